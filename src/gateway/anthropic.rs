//! Anthropic messages API.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{post_json, LlmProvider, ProviderCallResult};
use crate::error::Result;
use crate::models::Provider;

/// API version header value
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// `/v1/messages` with `x-api-key` auth
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    default_model: String,
}

impl AnthropicProvider {
    /// Create a provider posting to `endpoint`
    pub fn new(
        client: Client,
        endpoint: impl Into<String>,
        api_key: Option<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            default_model: default_model.into(),
        }
    }
}

/// Join the `text` blocks of a messages reply
fn joined_text(raw: &Value) -> Option<String> {
    let blocks = raw.get("content")?.as_array()?;
    let text: Vec<&str> = blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text.join(""))
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn id(&self) -> &str {
        Provider::Anthropic.id()
    }

    fn family(&self) -> Provider {
        Provider::Anthropic
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn missing_credential(&self) -> Option<String> {
        match self.api_key {
            Some(_) => None,
            None => Some(format!("{} not configured", Provider::Anthropic.api_key_env())),
        }
    }

    async fn call(&self, prompt: &str, max_output_tokens: u32, model: &str) -> Result<ProviderCallResult> {
        let key = self.api_key.as_deref().unwrap_or_default();
        let request = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&json!({
                "model": model,
                "max_tokens": max_output_tokens,
                "messages": [{"role": "user", "content": prompt}],
            }));

        let raw = post_json(request).await?;
        match joined_text(&raw) {
            Some(text) => Ok(ProviderCallResult::ok(text, raw)),
            None => Ok(ProviderCallResult::failure(
                "anthropic response carried no text blocks",
                raw,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_joined_text_skips_other_blocks() {
        let raw = json!({
            "content": [
                {"type": "text", "text": "Hello, "},
                {"type": "tool_use", "id": "t1"},
                {"type": "text", "text": "world"}
            ]
        });
        assert_eq!(joined_text(&raw).as_deref(), Some("Hello, world"));
        assert!(joined_text(&json!({"content": []})).is_none());
    }
}
