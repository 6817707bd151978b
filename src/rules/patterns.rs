//! PII redaction patterns.
//!
//! Matches are replaced by fixed placeholders. Patterns run in table order,
//! so card numbers are redacted before the looser email pattern sees them.

use lazy_static::lazy_static;
use regex::Regex;

/// A redaction rule
#[derive(Debug, Clone)]
pub struct PiiPattern {
    /// Pattern name
    pub name: &'static str,
    /// Regex pattern
    pub pattern: &'static str,
    /// Replacement text
    pub placeholder: &'static str,
}

/// Redaction rules, applied in order
pub static PII_PATTERNS: &[PiiPattern] = &[
    PiiPattern {
        name: "ssn",
        pattern: r"\b\d{3}-\d{2}-\d{4}\b",
        placeholder: "[SSN]",
    },
    PiiPattern {
        name: "payment_card",
        pattern: r"\b\d{4}[\s-]?\d{4}[\s-]?\d{4}[\s-]?\d{4}\b",
        placeholder: "[CARD]",
    },
    PiiPattern {
        name: "email",
        pattern: r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
        placeholder: "[EMAIL]",
    },
];

lazy_static! {
    /// Compiled redaction rules
    static ref COMPILED_PII: Vec<(Regex, &'static PiiPattern)> = PII_PATTERNS
        .iter()
        .filter_map(|p| Regex::new(p.pattern).ok().map(|r| (r, p)))
        .collect();
}

/// Names of the rules that match `text`
pub(crate) fn match_patterns(text: &str) -> Vec<&'static str> {
    COMPILED_PII
        .iter()
        .filter(|(re, _)| re.is_match(text))
        .map(|(_, p)| p.name)
        .collect()
}

/// Replace every match with its placeholder
pub fn redact(text: &str) -> String {
    COMPILED_PII
        .iter()
        .fold(text.to_string(), |acc, (re, p)| {
            re.replace_all(&acc, p.placeholder).into_owned()
        })
}
