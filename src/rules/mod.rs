//! Response rules: PII redaction, format coercion, token-budget truncation.
//!
//! The pipeline order is fixed: redact, then coerce, then truncate. Truncation
//! runs last so no earlier step can push the output back over budget.
//!
//! # Example
//!
//! ```
//! use prompttrim::models::Provider;
//! use prompttrim::rules::{OutputFormat, RulesConfig, RulesEnforcer};
//!
//! let enforcer = RulesEnforcer::default();
//! let config = RulesConfig::new(OutputFormat::List, 100, true).unwrap();
//!
//! let out = enforcer.enforce("mail bob@example.com\nthanks", "claude", Provider::Anthropic, &config);
//! assert_eq!(out, "- mail [EMAIL]\n- thanks");
//! ```

mod patterns;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, TrimError};
use crate::models::Provider;
use crate::tokenizer::{TokenAccountant, DEFAULT_CHARS_PER_TOKEN};

use patterns::match_patterns;
pub use patterns::{redact, PiiPattern, PII_PATTERNS};

/// Appended whenever output was cut
pub const TRUNCATION_MARKER: &str = "\n\n[TRUNCATED]";

/// Bullet prefixes recognised as already list-formatted
const BULLETS: [&str; 3] = ["- ", "* ", "• "];

/// Requested output shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OutputFormat {
    /// JSON object
    #[serde(rename = "structured", alias = "json")]
    Structured,
    /// Bullet list
    #[serde(rename = "list", alias = "bullet")]
    List,
    /// Unconstrained text
    #[default]
    #[serde(rename = "free-form", alias = "prose", alias = "freeform")]
    FreeForm,
}

impl OutputFormat {
    /// Parse a format name or alias (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "structured" | "json" => Some(OutputFormat::Structured),
            "list" | "bullet" => Some(OutputFormat::List),
            "free-form" | "freeform" | "prose" => Some(OutputFormat::FreeForm),
            _ => None,
        }
    }

    /// Canonical name
    pub fn name(self) -> &'static str {
        match self {
            OutputFormat::Structured => "structured",
            OutputFormat::List => "list",
            OutputFormat::FreeForm => "free-form",
        }
    }
}

/// Per-call rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Requested shape
    pub output_format: OutputFormat,
    /// Token budget (> 0)
    pub max_tokens: usize,
    /// Redact PII
    pub safety_enabled: bool,
}

impl RulesConfig {
    /// Build a config, rejecting a zero budget
    pub fn new(output_format: OutputFormat, max_tokens: usize, safety_enabled: bool) -> Result<Self> {
        if max_tokens == 0 {
            return Err(TrimError::InvalidRequest("max_tokens must be greater than 0".into()));
        }
        Ok(Self {
            output_format,
            max_tokens,
            safety_enabled,
        })
    }
}

/// Applies [`RulesConfig`] to provider output
#[derive(Debug, Clone, Copy, Default)]
pub struct RulesEnforcer {
    accountant: TokenAccountant,
}

impl RulesEnforcer {
    /// Enforcer using `accountant` for exact truncation
    pub fn new(accountant: TokenAccountant) -> Self {
        Self { accountant }
    }

    /// Redact, coerce and truncate `raw`. Never fails.
    pub fn enforce(&self, raw: &str, model: &str, provider: Provider, config: &RulesConfig) -> String {
        let matched = if config.safety_enabled {
            match_patterns(raw)
        } else {
            Vec::new()
        };
        let text = if matched.is_empty() {
            raw.to_string()
        } else {
            tracing::debug!(patterns = ?matched, "Redacting PII");
            redact(raw)
        };

        let text = match config.output_format {
            OutputFormat::Structured => coerce_structured(&text),
            OutputFormat::List => coerce_list(&text),
            OutputFormat::FreeForm => text,
        };

        self.truncate(&text, model, provider, config.max_tokens)
    }

    fn truncate(&self, text: &str, model: &str, provider: Provider, max_tokens: usize) -> String {
        if provider.has_exact_tokenizer() {
            match self.accountant.truncate(text, provider, model, max_tokens) {
                Ok(None) => return text.to_string(),
                Ok(Some(cut)) => return format!("{cut}{TRUNCATION_MARKER}"),
                Err(e) => {
                    tracing::warn!("Exact truncation failed, using character budget: {}", e);
                },
            }
        }
        truncate_chars(text, max_tokens.saturating_mul(DEFAULT_CHARS_PER_TOKEN))
    }
}

/// Keep at most `max_chars` characters, marking the cut
fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_pos, _)) => format!("{}{TRUNCATION_MARKER}", &text[..byte_pos]),
        None => text.to_string(),
    }
}

/// Valid JSON passes; otherwise the span from the first `{` to the last `}`.
/// Anything else is returned unchanged.
fn coerce_structured(text: &str) -> String {
    if serde_json::from_str::<Value>(text.trim()).is_ok() {
        return text.to_string();
    }
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => text[start..=end].to_string(),
        _ => text.to_string(),
    }
}

fn is_bulleted(line: &str) -> bool {
    let line = line.trim_start();
    BULLETS.iter().any(|b| line.starts_with(b))
}

/// Bullet-prefix every non-empty line
fn coerce_list(text: &str) -> String {
    if text.lines().filter(|l| !l.trim().is_empty()).all(is_bulleted) {
        return text.to_string();
    }
    text.lines()
        .map(|line| {
            if line.trim().is_empty() || is_bulleted(line) {
                line.to_string()
            } else {
                format!("- {}", line.trim())
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
