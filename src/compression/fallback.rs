//! Extractive word selection and model-output cleanup.

use lazy_static::lazy_static;
use regex::Regex;

/// Marker the compressor prompt ends with; anything before it is echo
pub const OUTPUT_MARKER: &str = "Compressed version:";

lazy_static! {
    /// Chat-template control tags (`<|assistant|>`, `<|end|>`, ...)
    static ref CONTROL_TAG: Option<Regex> = Regex::new(r"<\|.*?\|>").ok();
}

/// Cheap importance score for a single word.
///
/// One point each for: longer than 4 characters, leading capital, any digit.
pub fn word_importance(word: &str) -> u8 {
    let mut score = 0;
    if word.chars().count() > 4 {
        score += 1;
    }
    if word.chars().next().is_some_and(char::is_uppercase) {
        score += 1;
    }
    if word.chars().any(|c| c.is_ascii_digit()) {
        score += 1;
    }
    score
}

/// Keep the `max(1, round(n * ratio))` most important words.
///
/// Ties keep their source order. With `preserve_order` the survivors are
/// re-joined in source order, otherwise in rank order.
pub fn select_words(text: &str, ratio: f64, preserve_order: bool) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return String::new();
    }

    let keep = ((words.len() as f64 * ratio).round() as usize).clamp(1, words.len());

    let mut ranked: Vec<(usize, &str)> = words.into_iter().enumerate().collect();
    // sort_by is stable, so equal scores stay in source order
    ranked.sort_by(|a, b| word_importance(b.1).cmp(&word_importance(a.1)));
    ranked.truncate(keep);

    if preserve_order {
        ranked.sort_by_key(|(index, _)| *index);
    }

    ranked
        .into_iter()
        .map(|(_, word)| word)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Strip prompt echo and control tags from compressor output
pub fn clean_model_output(raw: &str) -> String {
    let body = match raw.rfind(OUTPUT_MARKER) {
        Some(pos) => &raw[pos + OUTPUT_MARKER.len()..],
        None => raw,
    };
    match CONTROL_TAG.as_ref() {
        Some(tag) => tag.replace_all(body, "").trim().to_string(),
        None => body.trim().to_string(),
    }
}
