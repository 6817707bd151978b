//! Lexical strategies: no model, no network, fully deterministic.

use std::collections::HashMap;

use async_trait::async_trait;

use super::{ReduceParams, SimilarityScorer, TextReducer};
use crate::error::Result;

/// Keeps leading sentences until the word budget is spent.
///
/// The instruction is ignored; a sentence that would overflow the budget is
/// cut at the word boundary.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalReducer;

#[async_trait]
impl TextReducer for LexicalReducer {
    fn name(&self) -> &str {
        "lexical"
    }

    async fn reduce(&self, text: &str, params: &ReduceParams) -> Result<String> {
        let budget = params.max_length.max(1);
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.len() <= budget {
            return Ok(words.join(" "));
        }

        // Prefer ending on a sentence boundary when one exists in the budget
        let kept = &words[..budget];
        let boundary = kept
            .iter()
            .rposition(|w| w.ends_with(['.', '!', '?']))
            .map(|i| i + 1)
            .filter(|&end| end >= params.min_length.max(1));

        Ok(kept[..boundary.unwrap_or(budget)].join(" "))
    }
}

/// Term-frequency cosine similarity
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalScorer;

#[async_trait]
impl SimilarityScorer for LexicalScorer {
    fn name(&self) -> &str {
        "lexical"
    }

    async fn similarity(&self, a: &str, b: &str) -> Result<f32> {
        Ok(term_similarity(a, b))
    }
}

fn term_frequencies(text: &str) -> HashMap<String, f32> {
    let mut counts = HashMap::new();
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        *counts.entry(word.to_lowercase()).or_insert(0.0) += 1.0;
    }
    counts
}

/// Cosine similarity of the two texts' term-frequency vectors, in `[0, 1]`
pub(crate) fn term_similarity(a: &str, b: &str) -> f32 {
    let fa = term_frequencies(a);
    let fb = term_frequencies(b);
    if fa.is_empty() || fb.is_empty() {
        return if fa.is_empty() && fb.is_empty() { 1.0 } else { 0.0 };
    }

    let dot: f32 = fa
        .iter()
        .filter_map(|(term, x)| fb.get(term).map(|y| x * y))
        .sum();
    let norm_a: f32 = fa.values().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = fb.values().map(|x| x * x).sum::<f32>().sqrt();

    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

/// Cosine similarity of two dense vectors.
///
/// Returns 0.0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reducer_short_text_unchanged() {
        let out = LexicalReducer
            .reduce("just a few words", &ReduceParams::new(10, 1))
            .await
            .unwrap();
        assert_eq!(out, "just a few words");
    }

    #[tokio::test]
    async fn test_reducer_prefers_sentence_boundary() {
        let text = "One two three. Four five six seven eight nine.";
        let out = LexicalReducer
            .reduce(text, &ReduceParams::new(5, 1))
            .await
            .unwrap();
        assert_eq!(out, "One two three.");
    }

    #[tokio::test]
    async fn test_reducer_respects_budget() {
        let text = "alpha beta gamma delta epsilon zeta eta theta";
        let out = LexicalReducer
            .reduce(text, &ReduceParams::new(3, 1))
            .await
            .unwrap();
        assert_eq!(out, "alpha beta gamma");
    }

    #[test]
    fn test_term_similarity_bounds() {
        assert!((term_similarity("the cat sat", "the cat sat") - 1.0).abs() < 1e-6);
        assert_eq!(term_similarity("apples", "oranges"), 0.0);
        assert_eq!(term_similarity("", ""), 1.0);
        assert_eq!(term_similarity("", "word"), 0.0);

        let partial = term_similarity("the cat sat on the mat", "the cat");
        assert!(partial > 0.0 && partial < 1.0);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
