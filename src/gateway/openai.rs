//! Chat-completions providers (OpenAI and xAI Grok).

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::stream::sse_text_stream;
use super::{post_json, LlmProvider, ProviderCallResult, TextStream};
use crate::error::Result;
use crate::models::Provider;

/// Sampling temperature sent with every completion
const TEMPERATURE: f64 = 0.3;

/// OpenAI-compatible `/chat/completions` endpoint with bearer auth
#[derive(Debug, Clone)]
pub struct ChatCompletionsProvider {
    family: Provider,
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    default_model: String,
}

impl ChatCompletionsProvider {
    /// Create a provider for `family` posting to `endpoint`
    pub fn new(
        family: Provider,
        client: Client,
        endpoint: impl Into<String>,
        api_key: Option<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            family,
            client,
            endpoint: endpoint.into(),
            api_key,
            default_model: default_model.into(),
        }
    }

    fn body(prompt: &str, max_output_tokens: u32, model: &str, stream: bool) -> Value {
        let mut body = json!({
            "model": model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": max_output_tokens,
            "temperature": TEMPERATURE,
        });
        if stream {
            body["stream"] = Value::Bool(true);
        }
        body
    }
}

#[async_trait]
impl LlmProvider for ChatCompletionsProvider {
    fn id(&self) -> &str {
        self.family.id()
    }

    fn family(&self) -> Provider {
        self.family
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn missing_credential(&self) -> Option<String> {
        match self.api_key {
            Some(_) => None,
            None => Some(format!("{} not configured", self.family.api_key_env())),
        }
    }

    async fn call(&self, prompt: &str, max_output_tokens: u32, model: &str) -> Result<ProviderCallResult> {
        let key = self.api_key.as_deref().unwrap_or_default();
        let request = self
            .client
            .post(&self.endpoint)
            .bearer_auth(key)
            .json(&Self::body(prompt, max_output_tokens, model, false));

        let raw = post_json(request).await?;
        match raw.pointer("/choices/0/message/content").and_then(Value::as_str) {
            Some(text) => Ok(ProviderCallResult::ok(text, raw.clone())),
            None => Ok(ProviderCallResult::failure(
                format!("{} response carried no message content", self.family.id()),
                raw,
            )),
        }
    }

    fn stream(&self, prompt: &str, max_output_tokens: u32, model: &str) -> Option<TextStream> {
        if !self.family.supports_streaming() {
            return None;
        }
        let key = self.api_key.as_deref().unwrap_or_default();
        let request = self
            .client
            .post(&self.endpoint)
            .bearer_auth(key)
            .json(&Self::body(prompt, max_output_tokens, model, true));
        Some(sse_text_stream(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_shape() {
        let body = ChatCompletionsProvider::body("hi", 64, "gpt-4o-mini", false);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hi");
        assert_eq!(body["max_tokens"], 64);
        assert!(body.get("stream").is_none());

        let streaming = ChatCompletionsProvider::body("hi", 64, "gpt-4o-mini", true);
        assert_eq!(streaming["stream"], true);
    }

    #[test]
    fn test_missing_key_message() {
        let provider = ChatCompletionsProvider::new(
            Provider::Grok,
            Client::new(),
            "http://localhost",
            None,
            "grok-beta",
        );
        assert_eq!(
            provider.missing_credential().as_deref(),
            Some("GROK_API_KEY not configured")
        );
        assert!(provider.stream("hi", 10, "grok-beta").is_none());
    }
}
