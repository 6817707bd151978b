//! Quality-controlled output reduction.
//!
//! Shrinks a provider response toward a length bound while keeping its
//! semantic similarity to the original above a target.
//!
//! # Loop
//!
//! ```text
//! iteration 0: reduce(original)            greedy
//! iteration 1: reduce(working)             sampled, working = "preserve ALL key facts" rewrite
//! iteration 2: reduce(working)             sampled, working = top-3 sentences expanded
//! iteration 3+: working = 2-sentence extractive summary (no model)
//! ```
//!
//! A candidate is accepted as soon as its similarity to the *original* text
//! reaches the target, or unconditionally on the last iteration. If the
//! reducer fails, a 3-sentence TF-IDF extractive summary is returned with
//! `iterations_used = max_iterations`.
//!
//! Similarity is clamped to `[0, 1]` before comparison and in every reported
//! value.

mod extractive;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::inference::{LexicalScorer, ReduceParams, SimilarityScorer, TextReducer};

pub use extractive::{extractive_summary, split_sentences};

/// Inputs shorter than this (in characters) are returned verbatim
pub const MIN_SUMMARIZABLE_CHARS: usize = 50;

/// Default acceptance threshold
pub const DEFAULT_TARGET_SIMILARITY: f32 = 0.75;

/// Default iteration bound
pub const DEFAULT_MAX_ITERATIONS: usize = 3;

/// Floor of the per-iteration length bound
const MIN_BOUND: usize = 30;

/// Length bounds for recompression rewrites
const RECOMPRESS_MAX_LENGTH: usize = 120;
const RECOMPRESS_MIN_LENGTH: usize = 50;

/// Outcome of the quality loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualitySummaryResult {
    /// Reduced text
    pub summary_text: String,
    /// Similarity to the original, in [0, 1]
    pub similarity_score: f32,
    /// Iterations spent (0 only for verbatim short input)
    pub iterations_used: usize,
}

/// Output-only reduction report (word-count metrics)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    /// Reduced text
    pub output: String,
    /// Similarity to the original, in [0, 1]
    pub similarity_to_original: f32,
    /// Iterations spent
    pub iterations_used: usize,
    /// Words in the original
    pub original_tokens: usize,
    /// Words in the output
    pub compressed_tokens: usize,
    /// Word reduction, rounded to 2 decimals
    pub reduction_percent: f64,
    /// Whether the similarity target was reached
    pub target_met: bool,
}

impl QualityReport {
    /// Build a report for `result` produced from `original`
    pub fn new(original: &str, result: QualitySummaryResult, target_similarity: f32) -> Self {
        let original_tokens = original.split_whitespace().count();
        let compressed_tokens = result.summary_text.split_whitespace().count();
        Self {
            target_met: result.similarity_score >= target_similarity,
            similarity_to_original: result.similarity_score,
            iterations_used: result.iterations_used,
            reduction_percent: reduction_percent(original_tokens, compressed_tokens),
            output: result.summary_text,
            original_tokens,
            compressed_tokens,
        }
    }
}

/// `(1 - after/before) * 100` rounded to 2 decimals; 0 for empty input
pub fn reduction_percent(before: usize, after: usize) -> f64 {
    if before == 0 {
        return 0.0;
    }
    let pct = (1.0 - after as f64 / before as f64) * 100.0;
    (pct * 100.0).round() / 100.0
}

/// Iterative reducer with similarity gate
#[derive(Clone)]
pub struct QualityController {
    reducer: Arc<dyn TextReducer>,
    scorer: Arc<dyn SimilarityScorer>,
    max_iterations: usize,
}

impl std::fmt::Debug for QualityController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QualityController")
            .field("reducer", &self.reducer.name())
            .field("scorer", &self.scorer.name())
            .field("max_iterations", &self.max_iterations)
            .finish()
    }
}

impl QualityController {
    /// Controller with the default iteration bound
    pub fn new(reducer: Arc<dyn TextReducer>, scorer: Arc<dyn SimilarityScorer>) -> Self {
        Self {
            reducer,
            scorer,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    /// Override the iteration bound (at least 1)
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// Iteration bound
    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Reduce `text` to roughly `max_length` words while keeping similarity
    /// to it at or above `target_similarity`.
    ///
    /// Never fails; always returns within `max_iterations` reducer rounds.
    pub async fn summarize_with_quality_check(
        &self,
        text: &str,
        max_length: usize,
        target_similarity: f32,
    ) -> QualitySummaryResult {
        if text.chars().count() < MIN_SUMMARIZABLE_CHARS {
            return QualitySummaryResult {
                summary_text: text.to_string(),
                similarity_score: 1.0,
                iterations_used: 0,
            };
        }

        let original = text;
        let mut working = text.to_string();

        for iteration in 0..self.max_iterations {
            let working_chars = working.chars().count();
            let candidate = if working_chars < MIN_SUMMARIZABLE_CHARS {
                // Nothing left to shrink; score the working text as-is
                working.clone()
            } else {
                let bound = max_length.min((working_chars / 3).max(MIN_BOUND)).max(MIN_BOUND);
                let params = ReduceParams::new(bound, bound / 4).with_sampling(iteration > 0);
                match self.reducer.reduce(&working, &params).await {
                    Ok(candidate) if !candidate.trim().is_empty() => candidate,
                    Ok(_) => {
                        tracing::warn!(iteration, "Reducer returned empty output");
                        break;
                    },
                    Err(e) => {
                        tracing::warn!(iteration, "Reducer failed: {}", e);
                        break;
                    },
                }
            };

            let similarity = self.similarity(original, &candidate).await;
            tracing::debug!(
                iteration,
                similarity,
                target = target_similarity,
                words = candidate.split_whitespace().count(),
                "Quality iteration"
            );

            let last = iteration + 1 == self.max_iterations;
            if similarity >= target_similarity || last {
                return QualitySummaryResult {
                    summary_text: candidate,
                    similarity_score: similarity,
                    iterations_used: iteration + 1,
                };
            }

            working = self.recompress(original, iteration + 1).await;
        }

        let summary_text = extractive_summary(original, 3);
        let similarity_score = self.similarity(original, &summary_text).await;
        tracing::info!(similarity_score, "Quality loop fell back to extractive summary");
        QualitySummaryResult {
            summary_text,
            similarity_score,
            iterations_used: self.max_iterations,
        }
    }

    /// Next working text after iteration `failed` (1-based) missed the target
    async fn recompress(&self, original: &str, failed: usize) -> String {
        let (input, instruction) = match failed {
            1 => (
                original.to_string(),
                "Summarize this while preserving ALL key facts and entities:",
            ),
            2 => (
                extractive_summary(original, 3),
                "Expand this into a complete summary:",
            ),
            _ => return extractive_summary(original, 2),
        };

        let params = ReduceParams::new(RECOMPRESS_MAX_LENGTH, RECOMPRESS_MIN_LENGTH)
            .with_instruction(instruction)
            .with_sampling(true);
        match self.reducer.reduce(&input, &params).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) | Err(_) => {
                tracing::warn!(failed, "Recompression failed, using extractive summary");
                extractive_summary(original, 2)
            },
        }
    }

    /// Clamped similarity; scorer failure degrades to lexical cosine
    async fn similarity(&self, a: &str, b: &str) -> f32 {
        let score = match self.scorer.similarity(a, b).await {
            Ok(score) => score,
            Err(e) => {
                tracing::warn!(scorer = self.scorer.name(), "Scorer failed, using lexical: {}", e);
                LexicalScorer.similarity(a, b).await.unwrap_or(0.0)
            },
        };
        if score.is_nan() {
            0.0
        } else {
            score.clamp(0.0, 1.0)
        }
    }
}
