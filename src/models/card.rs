//! Provider and encoding data structures.
//!
//! - `Provider`: LLM provider family reachable through the gateway
//! - `Encoding`: tokenizer encoding used for token accounting
//!
//! Only OpenAI publishes its tokenizer (via tiktoken), so it is the only
//! family with exact accounting. Every other family is estimated with the
//! ~4 characters per token heuristic.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TrimError;

/// LLM provider family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// OpenAI chat completions - tokenizer available via tiktoken
    OpenAI,
    /// Anthropic messages API
    Anthropic,
    /// xAI Grok (OpenAI-compatible chat completions)
    Grok,
    /// Generic text-in/text-out endpoint
    Custom,
}

impl Provider {
    /// All built-in providers
    pub const ALL: [Provider; 4] = [
        Provider::OpenAI,
        Provider::Anthropic,
        Provider::Grok,
        Provider::Custom,
    ];

    /// Identifier used on the wire (`"openai"`, `"anthropic"`, ...)
    pub fn id(&self) -> &'static str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Grok => "grok",
            Provider::Custom => "custom",
        }
    }

    /// Parse a provider identifier (case-insensitive)
    ///
    /// # Examples
    /// ```
    /// use prompttrim::models::Provider;
    ///
    /// assert_eq!(Provider::from_id("OpenAI"), Some(Provider::OpenAI));
    /// assert_eq!(Provider::from_id(" grok "), Some(Provider::Grok));
    /// assert_eq!(Provider::from_id("cohere"), None);
    /// ```
    pub fn from_id(id: &str) -> Option<Self> {
        match id.trim().to_lowercase().as_str() {
            "openai" => Some(Provider::OpenAI),
            "anthropic" | "claude" => Some(Provider::Anthropic),
            "grok" | "xai" => Some(Provider::Grok),
            "custom" => Some(Provider::Custom),
            _ => None,
        }
    }

    /// Get provider display name
    pub fn name(&self) -> &'static str {
        match self {
            Provider::OpenAI => "OpenAI",
            Provider::Anthropic => "Anthropic",
            Provider::Grok => "xAI Grok",
            Provider::Custom => "Custom",
        }
    }

    /// Built-in default model, used when neither the request nor the
    /// environment names one
    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::OpenAI => "gpt-4o-mini",
            Provider::Anthropic => "claude-3-5-sonnet-latest",
            Provider::Grok => "grok-beta",
            Provider::Custom => "default",
        }
    }

    /// Environment variable holding the credential
    pub fn api_key_env(&self) -> &'static str {
        match self {
            Provider::OpenAI => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::Grok => "GROK_API_KEY",
            Provider::Custom => "CUSTOM_LLM_API_KEY",
        }
    }

    /// Environment variable overriding the default model
    pub fn model_env(&self) -> &'static str {
        match self {
            Provider::OpenAI => "OPENAI_MODEL",
            Provider::Anthropic => "ANTHROPIC_MODEL",
            Provider::Grok => "GROK_MODEL",
            Provider::Custom => "CUSTOM_LLM_MODEL",
        }
    }

    /// Whether exact (tokenizer-backed) accounting exists for this family
    pub fn has_exact_tokenizer(&self) -> bool {
        matches!(self, Provider::OpenAI)
    }

    /// Whether incremental streaming is wired up for this family
    pub fn supports_streaming(&self) -> bool {
        matches!(self, Provider::OpenAI)
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

impl FromStr for Provider {
    type Err = TrimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_id(s).ok_or_else(|| TrimError::UnsupportedProvider(s.to_string()))
    }
}

/// Tokenizer encoding type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Encoding {
    /// OpenAI cl100k_base encoding (GPT-3.5, GPT-4) - via tiktoken
    #[default]
    Cl100kBase,
    /// OpenAI o200k_base encoding (GPT-4o, GPT-4.1, o-series) - via tiktoken
    O200kBase,
    /// Heuristic fallback (~4 characters per token)
    Heuristic,
}

impl Encoding {
    /// Infer encoding from a model name
    ///
    /// # Examples
    /// ```
    /// use prompttrim::models::Encoding;
    ///
    /// assert_eq!(Encoding::infer_from_model("gpt-4o-mini"), Encoding::O200kBase);
    /// assert_eq!(Encoding::infer_from_model("openai/gpt-4"), Encoding::Cl100kBase);
    /// assert_eq!(Encoding::infer_from_model("claude-3-5-sonnet-latest"), Encoding::Heuristic);
    /// ```
    pub fn infer_from_model(model: &str) -> Self {
        let lower = model.to_lowercase();
        let name = lower.rsplit('/').next().unwrap_or(&lower);

        if name.starts_with("gpt-4o")
            || name.starts_with("gpt-4.1")
            || name.starts_with("gpt-5")
            || name.starts_with("o1")
            || name.starts_with("o3")
            || name.starts_with("o4")
        {
            return Encoding::O200kBase;
        }

        if name.starts_with("gpt-3") || name.starts_with("gpt-4") || name.starts_with("text-") {
            return Encoding::Cl100kBase;
        }

        Encoding::Heuristic
    }

    /// Encoding used to account `model` served by `provider`.
    ///
    /// OpenAI models the table does not recognise fall back to cl100k_base;
    /// every other family is heuristic regardless of model name.
    pub fn for_provider(provider: Provider, model: &str) -> Self {
        if !provider.has_exact_tokenizer() {
            return Encoding::Heuristic;
        }
        match Self::infer_from_model(model) {
            Encoding::Heuristic => Encoding::Cl100kBase,
            exact => exact,
        }
    }

    /// Whether this encoding is tokenizer-backed
    pub fn is_exact(&self) -> bool {
        !matches!(self, Encoding::Heuristic)
    }

    /// Get encoding name as string
    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Cl100kBase => "cl100k_base",
            Encoding::O200kBase => "o200k_base",
            Encoding::Heuristic => "heuristic",
        }
    }
}
