//! Pluggable model-backed strategies.
//!
//! The compression engine and the quality controller never talk to a model
//! directly. They go through two narrow capabilities:
//!
//! - [`TextReducer`]: text in, shorter text out (abstractive summarizer or
//!   instruction-following prompt compressor)
//! - [`SimilarityScorer`]: semantic similarity of two texts in `[0, 1]`
//!
//! # Backends
//!
//! - **Remote**: HTTP inference endpoints (text-generation / embeddings)
//! - **Lexical**: deterministic, dependency-free implementations used when no
//!   endpoint is configured, and as the fallback when an endpoint fails
//!
//! All backends are created once at startup through [`Backends`] and shared
//! read-only by every request.
//!
//! # Example
//!
//! ```
//! use prompttrim::inference::{Backends, ReduceParams};
//!
//! # tokio_test::block_on(async {
//! let backends = Backends::lexical();
//! let text = "First point. Second point. Third point.";
//! let summary = backends
//!     .reducer
//!     .reduce(text, &ReduceParams::new(3, 1))
//!     .await
//!     .unwrap();
//! assert!(summary.split_whitespace().count() <= 3);
//! # });
//! ```

mod lexical;
mod remote;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::BackendConfig;
use crate::error::Result;

pub use lexical::{cosine_similarity, LexicalReducer, LexicalScorer};
pub use remote::{RemoteEmbedder, RemoteReducer};

/// Parameters for a single reduction call
#[derive(Debug, Clone, PartialEq)]
pub struct ReduceParams {
    /// Instruction placed in front of the text, if the backend follows one
    pub instruction: Option<String>,
    /// Upper bound on output length (words / new tokens)
    pub max_length: usize,
    /// Lower bound on output length
    pub min_length: usize,
    /// Allow sampling (non-greedy decoding)
    pub sample: bool,
}

impl ReduceParams {
    /// Greedy reduction with the given bounds
    pub fn new(max_length: usize, min_length: usize) -> Self {
        Self {
            instruction: None,
            max_length,
            min_length: min_length.min(max_length),
            sample: false,
        }
    }

    /// Attach an instruction
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    /// Enable or disable sampling
    pub fn with_sampling(mut self, sample: bool) -> Self {
        self.sample = sample;
        self
    }

    /// Render the model input for instruction-following backends
    pub fn render(&self, text: &str) -> String {
        match &self.instruction {
            Some(instruction) => format!("{instruction}\n\n{text}"),
            None => text.to_string(),
        }
    }
}

/// Produces a shorter rendition of a text
#[async_trait]
pub trait TextReducer: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Reduce `text` within `params`
    async fn reduce(&self, text: &str, params: &ReduceParams) -> Result<String>;
}

/// Scores semantic similarity between two texts
#[async_trait]
pub trait SimilarityScorer: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Similarity of `a` and `b`; implementations should return `[0, 1]`
    async fn similarity(&self, a: &str, b: &str) -> Result<f32>;
}

/// Strategy instances shared by the pipeline
#[derive(Clone)]
pub struct Backends {
    /// Output summarizer
    pub reducer: Arc<dyn TextReducer>,
    /// Semantic similarity
    pub scorer: Arc<dyn SimilarityScorer>,
    /// Primary prompt compressor (absent means extractive only)
    pub compressor: Option<Arc<dyn TextReducer>>,
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends")
            .field("reducer", &self.reducer.name())
            .field("scorer", &self.scorer.name())
            .field("compressor", &self.compressor.as_ref().map(|c| c.name().to_string()))
            .finish()
    }
}

impl Backends {
    /// Lexical-only backends (no network)
    pub fn lexical() -> Self {
        Self {
            reducer: Arc::new(LexicalReducer),
            scorer: Arc::new(LexicalScorer),
            compressor: None,
        }
    }

    /// Build backends from configuration.
    ///
    /// Endpoints that are not configured get the lexical implementation.
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let token = config.token.clone();

        let reducer: Arc<dyn TextReducer> = match &config.summarizer_url {
            Some(url) => Arc::new(RemoteReducer::new("summarizer", url, token.clone(), timeout)?),
            None => Arc::new(LexicalReducer),
        };
        let scorer: Arc<dyn SimilarityScorer> = match &config.embedding_url {
            Some(url) => Arc::new(RemoteEmbedder::new(url, token.clone(), timeout)?),
            None => Arc::new(LexicalScorer),
        };
        let compressor: Option<Arc<dyn TextReducer>> = match &config.compressor_url {
            Some(url) => Some(Arc::new(RemoteReducer::new("compressor", url, token, timeout)?)),
            None => None,
        };

        tracing::info!(
            reducer = reducer.name(),
            scorer = scorer.name(),
            compressor = compressor.as_ref().map(|c| c.name()).unwrap_or("none"),
            "Inference backends ready"
        );

        Ok(Self {
            reducer,
            scorer,
            compressor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_clamp_min_length() {
        let params = ReduceParams::new(10, 50);
        assert_eq!(params.min_length, 10);
    }

    #[test]
    fn test_render_with_instruction() {
        let params = ReduceParams::new(10, 1).with_instruction("Summarize:");
        assert_eq!(params.render("body"), "Summarize:\n\nbody");
        assert_eq!(ReduceParams::new(10, 1).render("body"), "body");
    }

    #[test]
    fn test_from_config_defaults_to_lexical() {
        let backends = Backends::from_config(&BackendConfig::default()).unwrap();
        assert_eq!(backends.reducer.name(), "lexical");
        assert_eq!(backends.scorer.name(), "lexical");
        assert!(backends.compressor.is_none());
    }

    #[test]
    fn test_from_config_remote() {
        let config = BackendConfig {
            summarizer_url: Some("http://127.0.0.1:1/summarize".into()),
            compressor_url: Some("http://127.0.0.1:1/generate".into()),
            ..BackendConfig::default()
        };
        let backends = Backends::from_config(&config).unwrap();
        assert_eq!(backends.reducer.name(), "summarizer");
        assert_eq!(backends.scorer.name(), "lexical");
        assert!(backends.compressor.is_some());
    }
}
