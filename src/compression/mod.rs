//! Ratio-driven prompt compression.
//!
//! The engine asks an optional model-backed compressor for a rewrite close to
//! the token target. When there is no compressor, when it fails, or when its
//! answer is implausibly short, a deterministic word-importance selection is
//! used instead, so compression of non-empty input always succeeds.
//!
//! # Levels
//!
//! | Level        | Ratio | Access tier |
//! |--------------|-------|-------------|
//! | `minimal`    | 0.8   | 1           |
//! | `moderate`   | 0.5   | 2           |
//! | `aggressive` | 0.3   | 3           |
//!
//! # Example
//!
//! ```
//! use prompttrim::compression::CompressionEngine;
//! use prompttrim::models::Provider;
//! use prompttrim::tokenizer::TokenAccountant;
//!
//! # tokio_test::block_on(async {
//! let engine = CompressionEngine::new(TokenAccountant::new());
//! let result = engine
//!     .compress("Please explain the Rust borrow checker in detail", 0.5, Provider::Anthropic)
//!     .await;
//! assert!(result.compressed_token_count >= 1);
//! assert!(result.compressed_token_count <= result.original_token_count);
//! # });
//! ```

mod fallback;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrimError};
use crate::inference::{ReduceParams, TextReducer};
use crate::models::Provider;
use crate::tokenizer::{savings_percent, TokenAccountant};

pub use fallback::{clean_model_output, select_words, word_importance, OUTPUT_MARKER};

/// Ratio used when a level name is not recognised
pub const DEFAULT_RATIO: f64 = 0.5;

/// Primary output shorter than this fraction of the input (in characters)
/// is rejected
pub const MIN_PRIMARY_FRACTION: f64 = 0.1;

/// Named compression level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    /// Keep 80% of tokens
    Minimal,
    /// Keep 50% of tokens
    #[default]
    Moderate,
    /// Keep 30% of tokens
    Aggressive,
}

impl CompressionLevel {
    /// Fraction of tokens to keep
    pub fn ratio(self) -> f64 {
        match self {
            CompressionLevel::Minimal => 0.8,
            CompressionLevel::Moderate => 0.5,
            CompressionLevel::Aggressive => 0.3,
        }
    }

    /// Level name as used on the wire
    pub fn name(self) -> &'static str {
        match self {
            CompressionLevel::Minimal => "minimal",
            CompressionLevel::Moderate => "moderate",
            CompressionLevel::Aggressive => "aggressive",
        }
    }

    /// Parse a level name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "minimal" => Some(CompressionLevel::Minimal),
            "moderate" => Some(CompressionLevel::Moderate),
            "aggressive" => Some(CompressionLevel::Aggressive),
            _ => None,
        }
    }

    /// Map a numeric access tier (1, 2, 3) to a level
    pub fn from_tier(tier: u8) -> Option<Self> {
        match tier {
            1 => Some(CompressionLevel::Minimal),
            2 => Some(CompressionLevel::Moderate),
            3 => Some(CompressionLevel::Aggressive),
            _ => None,
        }
    }
}

impl std::fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Ratio for a level name; unknown names get [`DEFAULT_RATIO`]
pub fn ratio_for_level(name: &str) -> f64 {
    CompressionLevel::from_name(name).map_or(DEFAULT_RATIO, CompressionLevel::ratio)
}

/// Validated compression input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionRequest {
    /// Text to compress
    pub text: String,
    /// Fraction of tokens to keep, in (0, 1]
    pub target_ratio: f64,
    /// Provider family the text is accounted for
    pub provider_hint: Provider,
}

impl CompressionRequest {
    /// Build a request, rejecting ratios outside (0, 1]
    pub fn new(text: impl Into<String>, target_ratio: f64, provider_hint: Provider) -> Result<Self> {
        if !(target_ratio > 0.0 && target_ratio <= 1.0) {
            return Err(TrimError::InvalidRequest(format!(
                "target_ratio must be within (0, 1], got {target_ratio}"
            )));
        }
        Ok(Self {
            text: text.into(),
            target_ratio,
            provider_hint,
        })
    }
}

/// Which path produced the compressed text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionStrategy {
    /// Nothing to do (empty input or ratio 1)
    Passthrough,
    /// Model-backed compressor
    Primary,
    /// Word-importance selection
    Extractive,
}

/// Compression outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionResult {
    /// Compressed text
    pub compressed_text: String,
    /// Tokens before compression
    pub original_token_count: usize,
    /// Tokens after compression
    pub compressed_token_count: usize,
    /// compressed / original (1.0 for empty input)
    pub achieved_ratio: f64,
    /// (1 - compressed/original) * 100
    pub savings_percent: f64,
    /// Path taken
    pub strategy: CompressionStrategy,
}

impl CompressionResult {
    fn measured(
        text: String,
        original_tokens: usize,
        compressed_tokens: usize,
        strategy: CompressionStrategy,
    ) -> Self {
        let achieved_ratio = if original_tokens == 0 {
            1.0
        } else {
            compressed_tokens as f64 / original_tokens as f64
        };
        Self {
            compressed_text: text,
            original_token_count: original_tokens,
            compressed_token_count: compressed_tokens,
            achieved_ratio,
            savings_percent: savings_percent(original_tokens, compressed_tokens),
            strategy,
        }
    }
}

/// Prompt compression engine
#[derive(Clone)]
pub struct CompressionEngine {
    accountant: TokenAccountant,
    primary: Option<Arc<dyn TextReducer>>,
    preserve_word_order: bool,
}

impl std::fmt::Debug for CompressionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressionEngine")
            .field("accountant", &self.accountant)
            .field("primary", &self.primary.as_ref().map(|p| p.name().to_string()))
            .field("preserve_word_order", &self.preserve_word_order)
            .finish()
    }
}

impl CompressionEngine {
    /// Extractive-only engine
    pub fn new(accountant: TokenAccountant) -> Self {
        Self {
            accountant,
            primary: None,
            preserve_word_order: true,
        }
    }

    /// Attach a model-backed compressor
    pub fn with_primary(mut self, primary: Arc<dyn TextReducer>) -> Self {
        self.primary = Some(primary);
        self
    }

    /// Choose source-order (`true`) or rank-order (`false`) reconstruction
    pub fn with_word_order(mut self, preserve: bool) -> Self {
        self.preserve_word_order = preserve;
        self
    }

    /// Compress a validated request
    pub async fn compress_request(&self, request: &CompressionRequest) -> CompressionResult {
        self.compress(&request.text, request.target_ratio, request.provider_hint)
            .await
    }

    /// Compress `text` to roughly `ratio` of its tokens.
    ///
    /// Never fails. Whitespace-only input yields an empty zero-token result
    /// without invoking either strategy; out-of-range ratios are clamped into
    /// (0, 1] and NaN is treated as [`DEFAULT_RATIO`].
    pub async fn compress(&self, text: &str, ratio: f64, provider: Provider) -> CompressionResult {
        if text.trim().is_empty() {
            return CompressionResult::measured(String::new(), 0, 0, CompressionStrategy::Passthrough);
        }

        let ratio = if ratio.is_nan() {
            DEFAULT_RATIO
        } else {
            ratio.clamp(f64::EPSILON, 1.0)
        };

        let original_tokens = self.accountant.estimate(text, provider);
        if ratio >= 1.0 {
            return CompressionResult::measured(
                text.to_string(),
                original_tokens,
                original_tokens,
                CompressionStrategy::Passthrough,
            );
        }

        let target_tokens = ((original_tokens as f64 * ratio).round() as usize).max(1);

        let (compressed, strategy) = match self.try_primary(text, target_tokens).await {
            Some(out) => (out, CompressionStrategy::Primary),
            None => (
                select_words(text, ratio, self.preserve_word_order),
                CompressionStrategy::Extractive,
            ),
        };

        let compressed_tokens = self.accountant.estimate(&compressed, provider);
        tracing::debug!(
            original_tokens,
            target_tokens,
            compressed_tokens,
            ?strategy,
            "Compressed prompt"
        );

        CompressionResult::measured(compressed, original_tokens, compressed_tokens, strategy)
    }

    /// Run the primary compressor; `None` means fall back
    async fn try_primary(&self, text: &str, target_tokens: usize) -> Option<String> {
        let primary = self.primary.as_ref()?;

        let params = ReduceParams::new(target_tokens, target_tokens / 2).with_instruction(format!(
            "Compress the following text to approximately {target_tokens} tokens. \
             Keep the key concepts and entities, technical accuracy, complete \
             instructions and important details. Reply with the compressed text only."
        ));
        let input = format!("Text: {text}\n\n{OUTPUT_MARKER}");

        match primary.reduce(&input, &params).await {
            Ok(raw) => {
                let cleaned = clean_model_output(&raw);
                let floor = text.chars().count() as f64 * MIN_PRIMARY_FRACTION;
                if cleaned.is_empty() || (cleaned.chars().count() as f64) < floor {
                    tracing::warn!(
                        compressor = primary.name(),
                        output_chars = cleaned.chars().count(),
                        "Compressor output implausibly short, using extractive fallback"
                    );
                    None
                } else {
                    Some(cleaned)
                }
            },
            Err(e) => {
                tracing::warn!(
                    compressor = primary.name(),
                    "Compressor failed, using extractive fallback: {}",
                    e
                );
                None
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;

    struct FixedReducer(&'static str);

    #[async_trait]
    impl TextReducer for FixedReducer {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn reduce(&self, _text: &str, _params: &ReduceParams) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct FailingReducer;

    #[async_trait]
    impl TextReducer for FailingReducer {
        fn name(&self) -> &str {
            "failing"
        }

        async fn reduce(&self, _text: &str, _params: &ReduceParams) -> Result<String> {
            Err(TrimError::Inference("model not loaded".into()))
        }
    }

    const PROMPT: &str = "Please explain how the Rust borrow checker validates \
                          references across 3 nested Scopes with examples";

    #[test]
    fn test_level_ratios() {
        assert_eq!(ratio_for_level("minimal"), 0.8);
        assert_eq!(ratio_for_level("Moderate"), 0.5);
        assert_eq!(ratio_for_level("aggressive"), 0.3);
        assert_eq!(ratio_for_level("extreme"), DEFAULT_RATIO);
        assert_eq!(CompressionLevel::from_tier(3), Some(CompressionLevel::Aggressive));
        assert_eq!(CompressionLevel::from_tier(7), None);
    }

    #[test]
    fn test_request_validation() {
        assert!(CompressionRequest::new("x", 0.5, Provider::OpenAI).is_ok());
        assert!(CompressionRequest::new("x", 1.0, Provider::OpenAI).is_ok());
        assert!(CompressionRequest::new("x", 0.0, Provider::OpenAI).is_err());
        assert!(CompressionRequest::new("x", 1.5, Provider::OpenAI).is_err());
        assert!(CompressionRequest::new("x", f64::NAN, Provider::OpenAI).is_err());
    }

    #[tokio::test]
    async fn test_empty_input() {
        let engine = CompressionEngine::new(TokenAccountant::new()).with_primary(Arc::new(FailingReducer));
        let result = engine.compress("   ", 0.5, Provider::OpenAI).await;
        assert_eq!(result.compressed_text, "");
        assert_eq!(result.original_token_count, 0);
        assert_eq!(result.compressed_token_count, 0);
        assert_eq!(result.strategy, CompressionStrategy::Passthrough);
    }

    #[tokio::test]
    async fn test_ratio_one_is_noop() {
        let engine = CompressionEngine::new(TokenAccountant::new());
        let result = engine.compress(PROMPT, 1.0, Provider::OpenAI).await;
        assert_eq!(result.compressed_text, PROMPT);
        assert_eq!(result.savings_percent, 0.0);
    }

    #[tokio::test]
    async fn test_extractive_without_primary() {
        let engine = CompressionEngine::new(TokenAccountant::new());
        let result = engine.compress(PROMPT, 0.3, Provider::Anthropic).await;

        assert_eq!(result.strategy, CompressionStrategy::Extractive);
        assert!(result.compressed_token_count >= 1);
        assert!(result.compressed_token_count < result.original_token_count);
        assert!(result.savings_percent > 0.0);
        assert!(result.compressed_text.contains("Scopes"));
    }

    #[tokio::test]
    async fn test_primary_accepted() {
        let engine = CompressionEngine::new(TokenAccountant::new())
            .with_primary(Arc::new(FixedReducer("Explain Rust borrow checker, 3 nested scopes, examples")));
        let result = engine.compress(PROMPT, 0.5, Provider::OpenAI).await;
        assert_eq!(result.strategy, CompressionStrategy::Primary);
        assert_eq!(
            result.compressed_text,
            "Explain Rust borrow checker, 3 nested scopes, examples"
        );
    }

    #[tokio::test]
    async fn test_short_primary_output_rejected() {
        let engine = CompressionEngine::new(TokenAccountant::new()).with_primary(Arc::new(FixedReducer("ok")));
        let result = engine.compress(PROMPT, 0.5, Provider::OpenAI).await;
        assert_eq!(result.strategy, CompressionStrategy::Extractive);
    }

    #[tokio::test]
    async fn test_primary_failure_falls_back() {
        let engine = CompressionEngine::new(TokenAccountant::new()).with_primary(Arc::new(FailingReducer));
        let result = engine.compress(PROMPT, 0.5, Provider::Grok).await;
        assert_eq!(result.strategy, CompressionStrategy::Extractive);
        assert!(result.compressed_token_count >= 1);
    }

    #[tokio::test]
    async fn test_single_word_survives() {
        let engine = CompressionEngine::new(TokenAccountant::new());
        let result = engine.compress("Hello", 0.01, Provider::OpenAI).await;
        assert_eq!(result.compressed_text, "Hello");
        assert!(result.compressed_token_count >= 1);
    }
}
