//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files (`~/.config/prompttrim/config.toml` by default)
//! - Environment variables (always win over the file)
//! - CLI arguments (for `serve`)
//!
//! Every section has defaults, so an empty file (or no file at all) yields a
//! working configuration whose only gaps are provider credentials.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrimError};
use crate::gateway::RetryPolicy;
use crate::models::Provider;
use crate::orchestrator::AccessTier;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP listener settings
    #[serde(default)]
    pub server: ServerSettings,

    /// Provider credentials, models and endpoints
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Output quality loop settings
    #[serde(default)]
    pub quality: QualityConfig,

    /// Input compression settings
    #[serde(default)]
    pub compression: CompressionConfig,

    /// Provider retry settings
    #[serde(default)]
    pub retry: RetryConfig,

    /// Optional model-backed reducer/scorer endpoints
    #[serde(default)]
    pub backends: BackendConfig,

    /// Static caller profiles (API key to tier)
    #[serde(default)]
    pub profiles: Vec<ProfileEntry>,
}

impl Config {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("prompttrim").join("config.toml"))
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TrimError::Config(format!("Failed to read config file {}: {e}", path.display()))
        })?;

        toml::from_str(&content)
            .map_err(|e| TrimError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Load the effective configuration.
    ///
    /// Reads `path` if given (it must exist), otherwise the default path if
    /// present, then layers environment variables on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(default) if default.exists() => Self::from_file(default)?,
                _ => Self::default(),
            },
        };
        config.apply_env();
        Ok(config)
    }

    /// Overlay process environment variables
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Overlay variables from an arbitrary lookup (tests pass a map)
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        for provider in Provider::ALL {
            let settings = self.providers.get_mut(provider);
            if let Some(key) = non_empty(provider.api_key_env()) {
                settings.api_key = Some(key);
            }
            if let Some(model) = non_empty(provider.model_env()) {
                settings.model = Some(model);
            }
        }
        if let Some(base) = non_empty("GROK_API_BASE") {
            self.providers.grok.endpoint = Some(base);
        }
        if let Some(endpoint) = non_empty("CUSTOM_LLM_ENDPOINT") {
            self.providers.custom.endpoint = Some(endpoint);
        }

        // Server settings
        if let Some(host) = non_empty("PROMPTTRIM_HOST") {
            self.server.host = host;
        }
        if let Some(port) = non_empty("PROMPTTRIM_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(secs) = non_empty("PROMPTTRIM_REQUEST_TIMEOUT_SECS").and_then(|v| v.parse().ok())
        {
            self.server.request_timeout_secs = secs;
        }

        // Pipeline settings
        if let Some(threshold) =
            non_empty("PROMPTTRIM_SIMILARITY_THRESHOLD").and_then(|v| v.parse().ok())
        {
            self.quality.similarity_threshold = threshold;
        }
        if let Some(retries) = non_empty("PROMPTTRIM_MAX_RETRIES").and_then(|v| v.parse().ok()) {
            self.retry.max_retries = retries;
        }
        if let Some(ms) = non_empty("PROMPTTRIM_BACKOFF_MS").and_then(|v| v.parse().ok()) {
            self.retry.backoff_ms = ms;
        }
        if let Some(level) = non_empty("PROMPTTRIM_DEFAULT_LEVEL") {
            self.compression.default_level = level;
        }

        // Model backends
        if let Some(url) = non_empty("PROMPTTRIM_SUMMARIZER_URL") {
            self.backends.summarizer_url = Some(url);
        }
        if let Some(url) = non_empty("PROMPTTRIM_EMBEDDING_URL") {
            self.backends.embedding_url = Some(url);
        }
        if let Some(url) = non_empty("PROMPTTRIM_COMPRESSOR_URL") {
            self.backends.compressor_url = Some(url);
        }
        if let Some(token) = non_empty("PROMPTTRIM_BACKEND_TOKEN") {
            self.backends.token = Some(token);
        }
    }

    /// Reject values the pipeline cannot work with
    pub fn validate(&self) -> Result<()> {
        let threshold = self.quality.similarity_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(TrimError::Config(format!(
                "similarity_threshold must be within [0, 1], got {threshold}"
            )));
        }
        if self.quality.max_iterations == 0 {
            return Err(TrimError::Config("max_iterations must be at least 1".into()));
        }
        if self.compression.chars_per_token == 0 {
            return Err(TrimError::Config("chars_per_token must be at least 1".into()));
        }
        Ok(())
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Outbound provider request timeout in seconds
    pub request_timeout_secs: u64,

    /// Maximum request body size in bytes
    pub max_body_size: usize,

    /// Enable permissive CORS
    pub cors_enabled: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            request_timeout_secs: 60,
            max_body_size: 10 * 1024 * 1024, // 10 MB
            cors_enabled: true,
        }
    }
}

impl ServerSettings {
    /// Get the full listen address
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Outbound request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Settings for a single provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Credential (never written back out)
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Model override
    pub model: Option<String>,

    /// Endpoint override
    pub endpoint: Option<String>,
}

impl ProviderSettings {
    /// Effective model for `provider`
    pub fn model_for(&self, provider: Provider) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| provider.default_model().to_string())
    }

    /// Effective endpoint for `provider`.
    ///
    /// `custom` has no built-in endpoint and returns `None` until configured.
    pub fn endpoint_for(&self, provider: Provider) -> Option<String> {
        self.endpoint.clone().or_else(|| {
            let default = match provider {
                Provider::OpenAI => "https://api.openai.com/v1/chat/completions",
                Provider::Anthropic => "https://api.anthropic.com/v1/messages",
                Provider::Grok => "https://api.x.ai/v1/chat/completions",
                Provider::Custom => return None,
            };
            Some(default.to_string())
        })
    }
}

/// Per-provider settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// OpenAI chat completions
    pub openai: ProviderSettings,
    /// Anthropic messages
    pub anthropic: ProviderSettings,
    /// xAI Grok
    pub grok: ProviderSettings,
    /// Generic text endpoint
    pub custom: ProviderSettings,
}

impl ProvidersConfig {
    /// Settings for one provider
    pub fn get(&self, provider: Provider) -> &ProviderSettings {
        match provider {
            Provider::OpenAI => &self.openai,
            Provider::Anthropic => &self.anthropic,
            Provider::Grok => &self.grok,
            Provider::Custom => &self.custom,
        }
    }

    /// Mutable settings for one provider
    pub fn get_mut(&mut self, provider: Provider) -> &mut ProviderSettings {
        match provider {
            Provider::OpenAI => &mut self.openai,
            Provider::Anthropic => &mut self.anthropic,
            Provider::Grok => &mut self.grok,
            Provider::Custom => &mut self.custom,
        }
    }
}

/// Output quality loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Similarity the reduced output must reach
    pub similarity_threshold: f32,

    /// Maximum reduction attempts
    pub max_iterations: usize,

    /// Default summary bound (words) for `/api/output/reduce`
    pub default_max_length: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.75,
            max_iterations: 3,
            default_max_length: 200,
        }
    }
}

/// Input compression settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Level used when a request names none
    pub default_level: String,

    /// Keep surviving words in their original order
    pub preserve_word_order: bool,

    /// Heuristic characters per token
    pub chars_per_token: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            default_level: "moderate".to_string(),
            preserve_word_order: true,
            chars_per_token: crate::tokenizer::DEFAULT_CHARS_PER_TOKEN,
        }
    }
}

/// Provider retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Base backoff in milliseconds (doubles per attempt)
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 500,
        }
    }
}

impl RetryConfig {
    /// Build the runtime policy
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.backoff_ms))
    }
}

/// Model-backed strategy endpoints.
///
/// Any endpoint left unset is served by the lexical implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Abstractive summarizer (text-generation inference API)
    pub summarizer_url: Option<String>,

    /// Sentence embedding endpoint
    pub embedding_url: Option<String>,

    /// Instruction-following compressor for prompts
    pub compressor_url: Option<String>,

    /// Bearer token sent to every backend
    #[serde(skip_serializing)]
    pub token: Option<String>,

    /// Backend request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            summarizer_url: None,
            embedding_url: None,
            compressor_url: None,
            token: None,
            timeout_secs: 30,
        }
    }
}

/// Static caller profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileEntry {
    /// API key presented as a Bearer token
    pub key: String,

    /// Caller identifier
    pub id: String,

    /// Optional tier (1/2/3 or a level name)
    #[serde(default)]
    pub optimization_level: Option<AccessTier>,
}
