//! Multi-provider LLM gateway.
//!
//! Every provider is one [`LlmProvider`] variant registered under its
//! identifier; adding a provider means adding a variant, not editing a
//! dispatch function. All calls go through a shared [`RetryPolicy`].
//!
//! # Providers
//!
//! | Id          | Variant                     | Auth                    |
//! |-------------|-----------------------------|-------------------------|
//! | `openai`    | [`ChatCompletionsProvider`] | `Authorization: Bearer` |
//! | `grok`      | [`ChatCompletionsProvider`] | `Authorization: Bearer` |
//! | `anthropic` | [`AnthropicProvider`]       | `x-api-key`             |
//! | `custom`    | [`CustomProvider`]          | optional Bearer         |
//!
//! # Failure Semantics
//!
//! - Missing credential: `Ok(ProviderCallResult)` with `error` set, never retried
//! - Unknown identifier: `Err(TrimError::UnsupportedProvider)`
//! - Transport failure / 429 / 5xx: retried, last error returned
//!
//! # Example
//!
//! ```
//! use prompttrim::config::Config;
//! use prompttrim::gateway::ProviderGateway;
//!
//! # tokio_test::block_on(async {
//! // No credentials configured
//! let gateway = ProviderGateway::from_config(&Config::default()).unwrap();
//! let result = gateway.call("openai", "Hello", 16, None).await.unwrap();
//! assert_eq!(result.error.as_deref(), Some("OPENAI_API_KEY not configured"));
//! assert!(result.text.is_empty());
//! # });
//! ```

mod anthropic;
mod custom;
mod openai;
mod retry;
mod stream;

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use serde_json::Value;

use crate::config::Config;
use crate::error::{Result, TrimError};
use crate::models::Provider;
use crate::tokenizer::TokenAccountant;

pub use anthropic::{AnthropicProvider, ANTHROPIC_VERSION};
pub use custom::CustomProvider;
pub use openai::ChatCompletionsProvider;
pub use retry::RetryPolicy;
pub use stream::{diagnostic, parse_sse_line, sse_text_stream, SseEvent};

/// Incremental text chunks
pub type TextStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Normalized provider reply.
///
/// Exactly one of `text` (non-empty) or `error` is meaningful.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderCallResult {
    /// Completion text
    pub text: String,
    /// Provider payload as received
    pub raw: Value,
    /// Client-facing failure description
    pub error: Option<String>,
}

impl ProviderCallResult {
    /// Successful reply
    pub fn ok(text: impl Into<String>, raw: Value) -> Self {
        Self {
            text: text.into(),
            raw,
            error: None,
        }
    }

    /// Failed reply
    pub fn failure(error: impl Into<String>, raw: Value) -> Self {
        Self {
            text: String::new(),
            raw,
            error: Some(error.into()),
        }
    }

    /// Whether the call failed
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// One provider variant
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Registry identifier
    fn id(&self) -> &str;

    /// Provider family (drives token accounting)
    fn family(&self) -> Provider;

    /// Model used when the caller names none
    fn default_model(&self) -> &str;

    /// Description of the missing credential/endpoint, if any
    fn missing_credential(&self) -> Option<String>;

    /// Single completion attempt
    async fn call(&self, prompt: &str, max_output_tokens: u32, model: &str) -> Result<ProviderCallResult>;

    /// Incremental completion, for variants that support it
    fn stream(&self, _prompt: &str, _max_output_tokens: u32, _model: &str) -> Option<TextStream> {
        None
    }

    /// Token estimate in this provider's accounting
    fn estimate_tokens(&self, text: &str, accountant: &TokenAccountant) -> usize {
        accountant.estimate(text, self.family())
    }
}

/// Extract a readable message from a provider error body
pub(crate) fn upstream_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        let message = json
            .pointer("/error/message")
            .or_else(|| json.get("error"))
            .or_else(|| json.get("message"))
            .and_then(Value::as_str);
        if let Some(message) = message {
            return message.to_string();
        }
    }
    body.chars().take(200).collect()
}

/// Send a JSON request and decode the JSON reply.
///
/// Non-2xx replies become [`TrimError::Upstream`]; connect, timeout and body
/// failures become [`TrimError::Network`].
pub(crate) async fn post_json(request: RequestBuilder) -> Result<Value> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(TrimError::Upstream {
            status: status.as_u16(),
            message: upstream_message(&body),
        });
    }

    serde_json::from_str(&body).map_err(|e| TrimError::Upstream {
        status: status.as_u16(),
        message: format!("invalid JSON reply: {e}"),
    })
}

/// Provider registry plus retry policy
#[derive(Clone)]
pub struct ProviderGateway {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for ProviderGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderGateway")
            .field("providers", &self.provider_ids())
            .field("retry", &self.retry)
            .finish()
    }
}

impl ProviderGateway {
    /// Empty gateway
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            providers: HashMap::new(),
            retry,
        }
    }

    /// Gateway with the four built-in providers
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.server.request_timeout())
            .build()
            .map_err(|e| TrimError::Network(format!("Failed to create HTTP client: {e}")))?;

        let mut gateway = Self::new(config.retry.to_policy());
        let providers = &config.providers;

        for family in [Provider::OpenAI, Provider::Grok] {
            let settings = providers.get(family);
            let endpoint = settings.endpoint_for(family).unwrap_or_default();
            gateway.register(Arc::new(ChatCompletionsProvider::new(
                family,
                client.clone(),
                endpoint,
                settings.api_key.clone(),
                settings.model_for(family),
            )));
        }

        let anthropic = &providers.anthropic;
        gateway.register(Arc::new(AnthropicProvider::new(
            client.clone(),
            anthropic
                .endpoint_for(Provider::Anthropic)
                .unwrap_or_default(),
            anthropic.api_key.clone(),
            anthropic.model_for(Provider::Anthropic),
        )));

        let custom = &providers.custom;
        gateway.register(Arc::new(CustomProvider::new(
            client,
            custom.endpoint_for(Provider::Custom),
            custom.api_key.clone(),
            custom.model_for(Provider::Custom),
        )));

        Ok(gateway)
    }

    /// Register (or replace) a provider under its identifier
    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        self.providers
            .insert(provider.id().to_lowercase(), provider);
    }

    /// Retry policy in use
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Look up a provider (case-insensitive)
    pub fn resolve(&self, provider_id: &str) -> Result<&Arc<dyn LlmProvider>> {
        self.providers
            .get(&provider_id.trim().to_lowercase())
            .ok_or_else(|| TrimError::UnsupportedProvider(provider_id.to_string()))
    }

    /// Registered identifiers, sorted
    pub fn provider_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Identifiers whose credentials are present, sorted
    pub fn configured_providers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .providers
            .iter()
            .filter(|(_, p)| p.missing_credential().is_none())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Whether `provider_id` can stream
    pub fn supports_streaming(&self, provider_id: &str) -> bool {
        self.resolve(provider_id)
            .is_ok_and(|p| p.family().supports_streaming())
    }

    /// Model a call would use
    pub fn effective_model(&self, provider_id: &str, model: Option<&str>) -> Result<String> {
        let provider = self.resolve(provider_id)?;
        Ok(model
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| provider.default_model())
            .to_string())
    }

    /// Call a provider with retries.
    ///
    /// A missing credential or an empty completion is reported in the
    /// result, not as an error.
    pub async fn call(
        &self,
        provider_id: &str,
        prompt: &str,
        max_output_tokens: u32,
        model: Option<&str>,
    ) -> Result<ProviderCallResult> {
        let provider = self.resolve(provider_id)?;
        if let Some(missing) = provider.missing_credential() {
            tracing::warn!(provider = provider.id(), "{}", missing);
            return Ok(ProviderCallResult::failure(missing, Value::Null));
        }

        let model = self.effective_model(provider_id, model)?;
        let provider: &dyn LlmProvider = provider.as_ref();
        let model_ref = model.as_str();

        tracing::debug!(provider = provider.id(), model = model_ref, "Calling provider");
        let result = self
            .retry
            .execute(move || provider.call(prompt, max_output_tokens, model_ref))
            .await?;

        // A reply must carry text or an error, never neither
        if !result.is_error() && result.text.trim().is_empty() {
            tracing::warn!(provider = provider.id(), "Provider returned an empty completion");
            return Ok(ProviderCallResult::failure(
                format!("{} returned an empty completion", provider.id()),
                result.raw,
            ));
        }
        Ok(result)
    }

    /// Open a stream for a provider that supports it.
    ///
    /// Missing credentials and non-streaming providers are rejected before
    /// any network traffic.
    pub fn stream(
        &self,
        provider_id: &str,
        prompt: &str,
        max_output_tokens: u32,
        model: Option<&str>,
    ) -> Result<TextStream> {
        let provider = self.resolve(provider_id)?;
        if let Some(missing) = provider.missing_credential() {
            return Err(TrimError::Config(missing));
        }

        let model = self.effective_model(provider_id, model)?;
        provider
            .stream(prompt, max_output_tokens, &model)
            .ok_or_else(|| {
                TrimError::InvalidRequest(format!(
                    "streaming is not supported for provider '{}'",
                    provider.id()
                ))
            })
    }
}
