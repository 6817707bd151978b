//! TF-IDF extractive summarization.
//!
//! Sentences are scored by the mean cosine similarity of their TF-IDF vector
//! against every sentence (including themselves); the most central ones are
//! kept in document order.

use std::collections::HashMap;

use lazy_static::lazy_static;
use ndarray::{Array2, Axis};
use regex::Regex;

lazy_static! {
    /// Two or more word characters
    static ref TERM: Option<Regex> = Regex::new(r"\b\w\w+\b").ok();
}

/// English stop words excluded from the vocabulary
static STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "also", "am", "an", "and", "any",
    "are", "as", "at", "be", "because", "been", "before", "being", "below", "between", "both",
    "but", "by", "can", "could", "did", "do", "does", "doing", "down", "during", "each", "few",
    "for", "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers",
    "herself", "him", "himself", "his", "how", "however", "if", "in", "into", "is", "it", "its",
    "itself", "just", "me", "more", "most", "my", "myself", "no", "nor", "not", "now", "of", "off",
    "on", "once", "only", "or", "other", "our", "ours", "ourselves", "out", "over", "own", "same",
    "she", "should", "so", "some", "such", "than", "that", "the", "their", "theirs", "them",
    "themselves", "then", "there", "these", "they", "this", "those", "through", "to", "too",
    "under", "until", "up", "very", "was", "we", "were", "what", "when", "where", "which",
    "while", "who", "whom", "why", "will", "with", "would", "you", "your", "yours", "yourself",
    "yourselves",
];

/// Split on `". "` boundaries, dropping empty pieces
pub fn split_sentences(text: &str) -> Vec<String> {
    text.split(". ")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn terms(sentence: &str) -> Vec<String> {
    let lower = sentence.to_lowercase();
    match TERM.as_ref() {
        Some(re) => re
            .find_iter(&lower)
            .map(|m| m.as_str().to_string())
            .filter(|t| !STOP_WORDS.contains(&t.as_str()))
            .collect(),
        None => lower
            .split_whitespace()
            .map(str::to_string)
            .collect(),
    }
}

/// L2-normalized TF-IDF matrix (sentences x vocabulary).
///
/// Uses smoothed idf: `ln((1 + n) / (1 + df)) + 1`. Returns `None` when no
/// sentence contributes a single term.
fn tfidf_matrix(sentences: &[String]) -> Option<Array2<f64>> {
    let docs: Vec<Vec<String>> = sentences.iter().map(|s| terms(s)).collect();

    let mut vocab: HashMap<&str, usize> = HashMap::new();
    for term in docs.iter().flatten() {
        let next = vocab.len();
        vocab.entry(term.as_str()).or_insert(next);
    }
    if vocab.is_empty() {
        return None;
    }

    let n = docs.len();
    let mut matrix = Array2::<f64>::zeros((n, vocab.len()));
    for (row, doc) in docs.iter().enumerate() {
        for term in doc {
            matrix[[row, vocab[term.as_str()]]] += 1.0;
        }
    }

    let df = matrix.mapv(|tf| if tf > 0.0 { 1.0 } else { 0.0 }).sum_axis(Axis(0));
    let idf = df.mapv(|d| ((1.0 + n as f64) / (1.0 + d)).ln() + 1.0);
    matrix *= &idf;

    for mut row in matrix.rows_mut() {
        let norm = row.dot(&row).sqrt();
        if norm > 0.0 {
            row /= norm;
        }
    }
    Some(matrix)
}

/// Keep the `n` most central sentences, in document order.
///
/// Text with `n` or fewer sentences is returned trimmed and otherwise
/// unchanged.
pub fn extractive_summary(text: &str, n: usize) -> String {
    let sentences = split_sentences(text);
    if sentences.len() <= n {
        return text.trim().to_string();
    }

    let mut keep: Vec<usize> = match tfidf_matrix(&sentences) {
        Some(matrix) => {
            let similarity = matrix.dot(&matrix.t());
            let scores = similarity
                .mean_axis(Axis(1))
                .map(|a| a.to_vec())
                .unwrap_or_default();

            let mut ranked: Vec<usize> = (0..sentences.len()).collect();
            ranked.sort_by(|&a, &b| {
                let sa = scores.get(a).copied().unwrap_or(0.0);
                let sb = scores.get(b).copied().unwrap_or(0.0);
                sb.total_cmp(&sa)
            });
            ranked.truncate(n);
            ranked
        },
        None => (0..n).collect(),
    };
    keep.sort_unstable();

    let body = keep
        .iter()
        .map(|&i| sentences[i].trim_end_matches('.'))
        .collect::<Vec<_>>()
        .join(". ");
    format!("{body}.")
}
