//! End-to-end request flow.
//!
//! ```text
//! resolve level -> compress prompt -> call provider -> quality-reduce output
//!               -> enforce rules -> account tokens -> record (detached)
//! ```
//!
//! Steps run strictly in this order. Nothing is retried here beyond what the
//! gateway's retry policy already does, and no state is shared between
//! requests except the read-only components themselves.

mod collaborators;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::compression::{CompressionEngine, CompressionLevel, CompressionResult, DEFAULT_RATIO};
use crate::config::Config;
use crate::error::{Result, TrimError};
use crate::gateway::{ProviderGateway, TextStream};
use crate::inference::Backends;
use crate::models::Provider;
use crate::quality::{reduction_percent, QualityController, QualityReport};
use crate::rules::{OutputFormat, RulesConfig, RulesEnforcer};
use crate::tokenizer::TokenAccountant;

pub use collaborators::{
    dispatch_record, AccessProfile, AccessTier, InMemoryDirectory, ProfileDirectory,
    RecordSink, RequestRecord, TracingSink,
};

/// Smallest summary bound used for chat output
const MIN_CHAT_SUMMARY_LENGTH: usize = 60;

fn default_max_output_tokens() -> u32 {
    256
}

fn default_true() -> bool {
    true
}

/// Synchronous (and streaming) gateway call input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Provider id
    pub provider: String,
    /// Model override
    #[serde(default)]
    pub model: Option<String>,
    /// User prompt
    pub prompt: String,
    /// Compression level name (configured default when absent)
    #[serde(default)]
    pub optimization_level: Option<String>,
    /// Explicit ratio, overriding the level lookup
    #[serde(default)]
    pub ratio: Option<f64>,
    /// Provider completion budget
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Output shape for the rules step
    #[serde(default)]
    pub output_format: Option<OutputFormat>,
    /// Final output token budget (defaults to `max_output_tokens`)
    #[serde(default)]
    pub max_tokens: Option<usize>,
    /// PII redaction
    #[serde(default = "default_true")]
    pub safety: bool,
}

impl ChatRequest {
    /// Request with defaults for everything but provider and prompt
    pub fn new(provider: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: None,
            prompt: prompt.into(),
            optimization_level: None,
            ratio: None,
            max_output_tokens: default_max_output_tokens(),
            output_format: None,
            max_tokens: None,
            safety: true,
        }
    }

    /// Set the level name
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.optimization_level = Some(level.into());
        self
    }

    /// Set the provider completion budget
    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    /// Set the model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Input side of a token breakdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputTokens {
    /// Prompt tokens before compression
    pub original: usize,
    /// Prompt tokens sent
    pub compressed: usize,
    /// Difference (never negative)
    pub saved: usize,
}

/// Output side of a token breakdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputTokens {
    /// Raw response tokens
    pub original: usize,
    /// Returned tokens
    #[serde(rename = "final")]
    pub final_tokens: usize,
    /// Difference (never negative)
    pub saved: usize,
}

/// Exact per-provider token accounting for one request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenBreakdown {
    /// Prompt side
    pub input: InputTokens,
    /// Response side
    pub output: OutputTokens,
    /// input.saved + output.saved
    pub total_saved: usize,
    /// 1 - (sent + returned) / (original prompt + raw response), in [0, 1]
    pub efficiency: f64,
}

impl TokenBreakdown {
    /// Derive a breakdown from four counts
    pub fn new(original_in: usize, compressed_in: usize, original_out: usize, final_out: usize) -> Self {
        let input = InputTokens {
            original: original_in,
            compressed: compressed_in,
            saved: original_in.saturating_sub(compressed_in),
        };
        let output = OutputTokens {
            original: original_out,
            final_tokens: final_out,
            saved: original_out.saturating_sub(final_out),
        };

        let before = original_in + original_out;
        let efficiency = if before == 0 {
            0.0
        } else {
            (1.0 - (compressed_in + final_out) as f64 / before as f64).clamp(0.0, 1.0)
        };

        Self {
            input,
            output,
            total_saved: input.saved + output.saved,
            efficiency,
        }
    }
}

/// Synchronous gateway call output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Provider id
    pub provider: String,
    /// Effective model
    pub model: String,
    /// Effective level
    pub optimization_level: String,
    /// Estimated tokens of the prompt actually sent
    pub prompt_tokens_est: usize,
    /// Estimated tokens of `final_output`
    pub output_tokens_est: usize,
    /// Provider response
    pub raw_output: String,
    /// Reduced, rule-enforced response
    pub final_output: String,
    /// Similarity of the reduced response to the raw one
    pub quality_similarity: f32,
    /// Quality loop iterations
    pub iterations_used: usize,
    /// Word reduction from raw to final
    pub reduction_percent: f64,
    /// Exact accounting, for providers with a tokenizer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenBreakdown>,
}

/// Output-only reduction input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReduceRequest {
    /// Text to reduce
    pub text: String,
    /// Summary bound (words)
    #[serde(default)]
    pub max_length: Option<usize>,
    /// Similarity target in [0, 1]
    #[serde(default)]
    pub target_similarity: Option<f32>,
}

/// Output-only reduction result
pub type ReduceResponse = QualityReport;

/// Effective compression level for one request
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLevel {
    /// Level name echoed to the caller
    pub name: String,
    /// Ratio handed to the engine
    pub ratio: f64,
}

/// Pipeline composition
#[derive(Clone)]
pub struct Orchestrator {
    accountant: TokenAccountant,
    compression: CompressionEngine,
    gateway: ProviderGateway,
    quality: QualityController,
    rules: RulesEnforcer,
    similarity_threshold: f32,
    default_max_length: usize,
    default_level: String,
    sink: Option<Arc<dyn RecordSink>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("compression", &self.compression)
            .field("gateway", &self.gateway)
            .field("quality", &self.quality)
            .field("similarity_threshold", &self.similarity_threshold)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Compose from parts
    pub fn new(
        accountant: TokenAccountant,
        compression: CompressionEngine,
        gateway: ProviderGateway,
        quality: QualityController,
    ) -> Self {
        Self {
            accountant,
            compression,
            gateway,
            quality,
            rules: RulesEnforcer::new(accountant),
            similarity_threshold: crate::quality::DEFAULT_TARGET_SIMILARITY,
            default_max_length: 200,
            default_level: CompressionLevel::default().name().to_string(),
            sink: None,
        }
    }

    /// Build every component from configuration and shared backends
    pub fn from_config(config: &Config, backends: &Backends) -> Result<Self> {
        config.validate()?;

        let accountant = TokenAccountant::new().with_chars_per_token(config.compression.chars_per_token);
        let mut compression =
            CompressionEngine::new(accountant).with_word_order(config.compression.preserve_word_order);
        if let Some(compressor) = &backends.compressor {
            compression = compression.with_primary(Arc::clone(compressor));
        }
        let gateway = ProviderGateway::from_config(config)?;
        let quality = QualityController::new(Arc::clone(&backends.reducer), Arc::clone(&backends.scorer))
            .with_max_iterations(config.quality.max_iterations);

        let mut orchestrator = Self::new(accountant, compression, gateway, quality)
            .with_similarity_threshold(config.quality.similarity_threshold)
            .with_default_level(&config.compression.default_level);
        orchestrator.default_max_length = config.quality.default_max_length;
        Ok(orchestrator)
    }

    /// Override the acceptance threshold
    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Level used when a request names none
    pub fn with_default_level(mut self, level: &str) -> Self {
        self.default_level = level.trim().to_lowercase();
        self
    }

    /// Persist request records through `sink`
    pub fn with_record_sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Provider gateway
    pub fn gateway(&self) -> &ProviderGateway {
        &self.gateway
    }

    /// Token accountant
    pub fn accountant(&self) -> &TokenAccountant {
        &self.accountant
    }

    /// Rules enforcer
    pub fn rules(&self) -> &RulesEnforcer {
        &self.rules
    }

    /// Level used when a request names none
    pub fn default_level(&self) -> &str {
        &self.default_level
    }

    /// Configured similarity threshold
    pub fn similarity_threshold(&self) -> f32 {
        self.similarity_threshold
    }

    /// Effective level: the request's (or the configured default), unless the
    /// caller's profile carries a recognised tier. Unknown names keep their
    /// echo but use the default ratio; an explicit ratio wins over both.
    pub fn resolve_level(&self, request: &ChatRequest, profile: Option<&AccessProfile>) -> Result<ResolvedLevel> {
        let tier = profile
            .and_then(|p| p.optimization_level.as_ref())
            .and_then(AccessTier::level);

        let name = match tier {
            Some(level) => level.name().to_string(),
            None => request
                .optimization_level
                .as_deref()
                .unwrap_or(self.default_level.as_str())
                .trim()
                .to_lowercase(),
        };

        let ratio = match request.ratio {
            Some(ratio) if ratio > 0.0 && ratio <= 1.0 => ratio,
            Some(ratio) => {
                return Err(TrimError::InvalidRequest(format!(
                    "ratio must be within (0, 1], got {ratio}"
                )))
            },
            None => CompressionLevel::from_name(&name).map_or(DEFAULT_RATIO, CompressionLevel::ratio),
        };

        Ok(ResolvedLevel { name, ratio })
    }

    /// Compress a prompt for `provider_id` without calling it
    pub async fn compress_input(&self, text: &str, ratio: f64, provider_id: &str) -> Result<CompressionResult> {
        let family = self.gateway.resolve(provider_id)?.family();
        Ok(self.compression.compress(text, ratio, family).await)
    }

    /// Full synchronous flow
    pub async fn chat(&self, request: &ChatRequest, profile: Option<&AccessProfile>) -> Result<ChatResponse> {
        if request.prompt.trim().is_empty() {
            return Err(TrimError::InvalidRequest("prompt must not be empty".into()));
        }
        if request.max_output_tokens == 0 {
            return Err(TrimError::InvalidRequest("max_output_tokens must be greater than 0".into()));
        }

        let provider = Arc::clone(self.gateway.resolve(&request.provider)?);
        if let Some(missing) = provider.missing_credential() {
            return Err(TrimError::Config(missing));
        }
        let family = provider.family();
        let level = self.resolve_level(request, profile)?;
        let rules = RulesConfig::new(
            request.output_format.unwrap_or_default(),
            request.max_tokens.unwrap_or(request.max_output_tokens as usize),
            request.safety,
        )?;

        let compressed = self.compression.compress(&request.prompt, level.ratio, family).await;

        let call = self
            .gateway
            .call(
                provider.id(),
                &compressed.compressed_text,
                request.max_output_tokens,
                request.model.as_deref(),
            )
            .await?;
        // Credentials were checked above, so a result error is a bad reply
        if let Some(error) = call.error {
            return Err(TrimError::Upstream {
                status: 502,
                message: error,
            });
        }
        let model = self.gateway.effective_model(provider.id(), request.model.as_deref())?;
        let raw_output = call.text;

        let max_length = MIN_CHAT_SUMMARY_LENGTH.max(request.max_output_tokens as usize / 2);
        let summary = self
            .quality
            .summarize_with_quality_check(&raw_output, max_length, self.similarity_threshold)
            .await;

        let final_output = self.rules.enforce(&summary.summary_text, &model, family, &rules);

        let prompt_tokens_est = provider.estimate_tokens(&compressed.compressed_text, &self.accountant);
        let output_tokens_est = provider.estimate_tokens(&final_output, &self.accountant);
        let reduction = reduction_percent(
            raw_output.split_whitespace().count(),
            final_output.split_whitespace().count(),
        );

        let tokens = if family.has_exact_tokenizer() {
            self.exact_breakdown(
                [request.prompt.as_str(), compressed.compressed_text.as_str()],
                [raw_output.as_str(), final_output.as_str()],
                family,
                &model,
            )
        } else {
            None
        };

        tracing::info!(
            provider = provider.id(),
            model = %model,
            level = %level.name,
            prompt_tokens = prompt_tokens_est,
            output_tokens = output_tokens_est,
            similarity = summary.similarity_score,
            iterations = summary.iterations_used,
            "Chat request completed"
        );

        let response = ChatResponse {
            provider: provider.id().to_string(),
            model,
            optimization_level: level.name,
            prompt_tokens_est,
            output_tokens_est,
            raw_output,
            final_output,
            quality_similarity: summary.similarity_score,
            iterations_used: summary.iterations_used,
            reduction_percent: reduction,
            tokens,
        };

        if let Some(sink) = &self.sink {
            let mut record = RequestRecord::new(&response.provider, &response.model, &response.optimization_level);
            record.user_id = profile.map(|p| p.id.clone());
            record.prompt_tokens_est = response.prompt_tokens_est;
            record.output_tokens_est = response.output_tokens_est;
            record.reduction_percent = response.reduction_percent;
            record.quality_similarity = response.quality_similarity;
            dispatch_record(Arc::clone(sink), record);
        }

        Ok(response)
    }

    fn exact_breakdown(
        &self,
        input: [&str; 2],
        output: [&str; 2],
        family: Provider,
        model: &str,
    ) -> Option<TokenBreakdown> {
        let counts = self
            .accountant
            .count_batch(&input, family, model)
            .and_then(|i| Ok((i, self.accountant.count_batch(&output, family, model)?)));
        match counts {
            Ok((i, o)) => Some(TokenBreakdown::new(i[0], i[1], o[0], o[1])),
            Err(e) => {
                tracing::warn!("Exact token breakdown unavailable: {}", e);
                None
            },
        }
    }

    /// Streaming flow: compress, then forward provider chunks as they arrive.
    ///
    /// Quality reduction and rules do not apply to streamed output.
    pub async fn stream(&self, request: &ChatRequest, profile: Option<&AccessProfile>) -> Result<TextStream> {
        if request.prompt.trim().is_empty() {
            return Err(TrimError::InvalidRequest("prompt must not be empty".into()));
        }

        let provider = self.gateway.resolve(&request.provider)?;
        if let Some(missing) = provider.missing_credential() {
            return Err(TrimError::Config(missing));
        }
        let family = provider.family();
        if !self.gateway.supports_streaming(&request.provider) {
            return Err(TrimError::InvalidRequest(format!(
                "streaming is not supported for provider '{}'",
                request.provider
            )));
        }

        let level = self.resolve_level(request, profile)?;
        let compressed = self.compression.compress(&request.prompt, level.ratio, family).await;
        tracing::info!(
            provider = %request.provider,
            level = %level.name,
            prompt_tokens = compressed.compressed_token_count,
            "Opening stream"
        );

        self.gateway.stream(
            &request.provider,
            &compressed.compressed_text,
            request.max_output_tokens,
            request.model.as_deref(),
        )
    }

    /// Output-only reduction with configured defaults
    pub async fn reduce_output(&self, request: &ReduceRequest) -> Result<ReduceResponse> {
        let target = request.target_similarity.unwrap_or(self.similarity_threshold);
        if !(0.0..=1.0).contains(&target) {
            return Err(TrimError::InvalidRequest(format!(
                "target_similarity must be within [0, 1], got {target}"
            )));
        }
        let max_length = request.max_length.unwrap_or(self.default_max_length);
        if max_length == 0 {
            return Err(TrimError::InvalidRequest("max_length must be greater than 0".into()));
        }

        let result = self
            .quality
            .summarize_with_quality_check(&request.text, max_length, target)
            .await;
        Ok(QualityReport::new(&request.text, result, target))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::inference::{ReduceParams, TextReducer};

    fn orchestrator() -> Orchestrator {
        Orchestrator::from_config(&Config::default(), &Backends::lexical()).unwrap()
    }

    #[test]
    fn test_breakdown_math() {
        let b = TokenBreakdown::new(100, 50, 200, 50);
        assert_eq!(b.input.saved, 50);
        assert_eq!(b.output.saved, 150);
        assert_eq!(b.total_saved, 200);
        assert!((b.efficiency - (1.0 - 100.0 / 300.0)).abs() < 1e-9);

        let grown = TokenBreakdown::new(10, 12, 0, 0);
        assert_eq!(grown.input.saved, 0);
        assert_eq!(grown.efficiency, 0.0);
    }

    #[test]
    fn test_breakdown_final_field_name() {
        let json = serde_json::to_value(TokenBreakdown::new(1, 1, 4, 2)).unwrap();
        assert_eq!(json["output"]["final"], 2);
    }

    #[test]
    fn test_request_defaults() {
        let request: ChatRequest =
            serde_json::from_str(r#"{"provider": "openai", "prompt": "hi"}"#).unwrap();
        assert!(request.optimization_level.is_none());
        assert_eq!(request.max_output_tokens, 256);
        assert!(request.safety);
        assert!(request.output_format.is_none());
    }

    #[test]
    fn test_resolve_level() {
        let orch = orchestrator();
        let request = ChatRequest::new("openai", "hi").with_level("Aggressive");
        let level = orch.resolve_level(&request, None).unwrap();
        assert_eq!(level.name, "aggressive");
        assert_eq!(level.ratio, 0.3);

        let unknown = ChatRequest::new("openai", "hi").with_level("turbo");
        let level = orch.resolve_level(&unknown, None).unwrap();
        assert_eq!(level.name, "turbo");
        assert_eq!(level.ratio, DEFAULT_RATIO);
    }

    #[test]
    fn test_profile_tier_overrides_level() {
        let orch = orchestrator();
        let request = ChatRequest::new("openai", "hi").with_level("aggressive");
        let profile = AccessProfile {
            id: "bob".into(),
            optimization_level: Some(AccessTier::Numeric(1)),
        };
        let level = orch.resolve_level(&request, Some(&profile)).unwrap();
        assert_eq!(level.name, "minimal");
        assert_eq!(level.ratio, 0.8);

        let unrecognised = AccessProfile {
            id: "eve".into(),
            optimization_level: Some(AccessTier::Numeric(9)),
        };
        let level = orch.resolve_level(&request, Some(&unrecognised)).unwrap();
        assert_eq!(level.name, "aggressive");
    }

    #[test]
    fn test_explicit_ratio() {
        let orch = orchestrator();
        let mut request = ChatRequest::new("openai", "hi");
        request.ratio = Some(0.25);
        assert_eq!(orch.resolve_level(&request, None).unwrap().ratio, 0.25);

        request.ratio = Some(0.0);
        assert!(orch.resolve_level(&request, None).is_err());
    }

    #[tokio::test]
    async fn test_missing_credential_surfaces_as_config_error() {
        let orch = orchestrator();
        let result = orch.chat(&ChatRequest::new("anthropic", "Explain Rust"), None).await;
        match result {
            Err(TrimError::Config(msg)) => assert_eq!(msg, "ANTHROPIC_API_KEY not configured"),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_provider() {
        let orch = orchestrator();
        let result = orch.chat(&ChatRequest::new("cohere", "Explain Rust"), None).await;
        assert!(matches!(result, Err(TrimError::UnsupportedProvider(_))));
    }

    #[tokio::test]
    async fn test_stream_rejects_non_streaming_provider() {
        let mut config = Config::default();
        config.providers.grok.api_key = Some("xai-test".into());
        let orch = Orchestrator::from_config(&config, &Backends::lexical()).unwrap();
        let result = orch.stream(&ChatRequest::new("grok", "Explain Rust"), None).await;
        assert!(matches!(result, Err(TrimError::InvalidRequest(_))));
    }

    /// Compressor that counts its invocations
    #[derive(Default)]
    struct CountingCompressor(AtomicUsize);

    #[async_trait]
    impl TextReducer for CountingCompressor {
        fn name(&self) -> &str {
            "counting"
        }

        async fn reduce(&self, text: &str, _params: &ReduceParams) -> Result<String> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(text.to_string())
        }
    }

    #[tokio::test]
    async fn test_missing_credential_rejected_before_compression() {
        let compressor = Arc::new(CountingCompressor::default());
        let backends = Backends {
            compressor: Some(compressor.clone() as Arc<dyn TextReducer>),
            ..Backends::lexical()
        };
        let orch = Orchestrator::from_config(&Config::default(), &backends).unwrap();
        let prompt = "Could you please explain in detail how Rust ownership works?";

        let streamed = orch.stream(&ChatRequest::new("openai", prompt), None).await;
        match streamed {
            Err(TrimError::Config(msg)) => assert_eq!(msg, "OPENAI_API_KEY not configured"),
            Err(other) => panic!("expected config error, got {other:?}"),
            Ok(_) => panic!("stream opened without a credential"),
        }

        let chat = orch.chat(&ChatRequest::new("openai", prompt), None).await;
        assert!(matches!(chat, Err(TrimError::Config(_))));
        assert_eq!(compressor.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_configured_default_level() {
        let mut config = Config::default();
        config.compression.default_level = "Aggressive".into();
        let orch = Orchestrator::from_config(&config, &Backends::lexical()).unwrap();
        assert_eq!(orch.default_level(), "aggressive");

        let level = orch.resolve_level(&ChatRequest::new("openai", "hi"), None).unwrap();
        assert_eq!(level.name, "aggressive");
        assert_eq!(level.ratio, 0.3);

        let explicit = ChatRequest::new("openai", "hi").with_level("minimal");
        assert_eq!(orch.resolve_level(&explicit, None).unwrap().ratio, 0.8);
    }

    #[tokio::test]
    async fn test_reduce_output_short_text() {
        let orch = orchestrator();
        let report = orch
            .reduce_output(&ReduceRequest {
                text: "Hi there.".into(),
                max_length: None,
                target_similarity: None,
            })
            .await
            .unwrap();
        assert_eq!(report.output, "Hi there.");
        assert_eq!(report.iterations_used, 0);
        assert!(report.target_met);
    }

    #[tokio::test]
    async fn test_reduce_output_validates_target() {
        let orch = orchestrator();
        let result = orch
            .reduce_output(&ReduceRequest {
                text: "anything".into(),
                max_length: None,
                target_similarity: Some(1.5),
            })
            .await;
        assert!(matches!(result, Err(TrimError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_compress_input() {
        let orch = orchestrator();
        let result = orch
            .compress_input("Summarize the Quarterly revenue report for 2024 in detail", 0.5, "openai")
            .await
            .unwrap();
        assert!(result.compressed_token_count >= 1);
        assert!(orch.compress_input("x", 0.5, "cohere").await.is_err());
    }
}
