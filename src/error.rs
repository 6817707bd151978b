//! PromptTrim error types.
//!
//! # Failure Classes
//!
//! Only two classes of failure ever reach a caller:
//!
//! - **Configuration**: a provider was requested that has no credential or
//!   endpoint, or the request itself is malformed. Never retried.
//! - **Transport**: a provider could not be reached (or answered 429/5xx)
//!   after the retry policy gave up.
//!
//! Everything else (tokenizer failures, primary-strategy failures, format
//! coercion, missed similarity targets) is recovered inside the pipeline and
//! only surfaces as a `warn!` log line and a lower-quality result.

use thiserror::Error;

/// PromptTrim errors.
#[derive(Error, Debug)]
pub enum TrimError {
    /// Missing credential, endpoint or invalid configuration value.
    #[error("Config error: {0}")]
    Config(String),

    /// Provider identifier is not registered with the gateway.
    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    /// Request failed validation before reaching the pipeline.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Network communication error (connect, timeout, body read).
    #[error("Network error: {0}")]
    Network(String),

    /// Provider answered with a non-success status.
    #[error("Upstream error ({status}): {message}")]
    Upstream {
        /// HTTP status code returned by the provider.
        status: u16,
        /// Provider error message, if one could be extracted.
        message: String,
    },

    /// Tokenizer could not encode or decode the text.
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// A model-backed strategy (reducer, scorer) failed.
    #[error("Inference error: {0}")]
    Inference(String),

    /// Server-side error.
    #[error("Server error: {0}")]
    Server(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TrimError {
    /// Whether the retry policy should try the operation again.
    ///
    /// Transport failures and throttling/5xx replies are transient; all
    /// other variants fail fast.
    pub fn is_transient(&self) -> bool {
        match self {
            TrimError::Network(_) => true,
            TrimError::Upstream { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Whether the failure is the caller's fault (maps to a 4xx reply).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            TrimError::Config(_) | TrimError::UnsupportedProvider(_) | TrimError::InvalidRequest(_)
        )
    }
}

/// Result type alias for PromptTrim operations
pub type Result<T> = std::result::Result<T, TrimError>;

impl From<reqwest::Error> for TrimError {
    fn from(err: reqwest::Error) -> Self {
        TrimError::Network(err.to_string())
    }
}

impl From<toml::de::Error> for TrimError {
    fn from(err: toml::de::Error) -> Self {
        TrimError::Config(err.to_string())
    }
}
