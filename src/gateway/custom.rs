//! Generic text-in/text-out endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{post_json, LlmProvider, ProviderCallResult};
use crate::error::Result;
use crate::models::Provider;

/// Posts `{model, prompt, max_tokens}` and reads `text` or `output`.
///
/// The endpoint is the credential here; the bearer key is optional.
#[derive(Debug, Clone)]
pub struct CustomProvider {
    client: Client,
    endpoint: Option<String>,
    api_key: Option<String>,
    default_model: String,
}

impl CustomProvider {
    /// Create a provider; `endpoint = None` leaves it unconfigured
    pub fn new(
        client: Client,
        endpoint: Option<String>,
        api_key: Option<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            endpoint,
            api_key,
            default_model: default_model.into(),
        }
    }
}

#[async_trait]
impl LlmProvider for CustomProvider {
    fn id(&self) -> &str {
        Provider::Custom.id()
    }

    fn family(&self) -> Provider {
        Provider::Custom
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn missing_credential(&self) -> Option<String> {
        match self.endpoint {
            Some(_) => None,
            None => Some("CUSTOM_LLM_ENDPOINT not configured".to_string()),
        }
    }

    async fn call(&self, prompt: &str, max_output_tokens: u32, model: &str) -> Result<ProviderCallResult> {
        let Some(endpoint) = self.endpoint.as_deref() else {
            return Ok(ProviderCallResult::failure(
                "CUSTOM_LLM_ENDPOINT not configured",
                Value::Null,
            ));
        };

        let mut request = self.client.post(endpoint).json(&json!({
            "model": model,
            "prompt": prompt,
            "max_tokens": max_output_tokens,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let raw = post_json(request).await?;
        let text = ["text", "output"]
            .iter()
            .find_map(|k| raw.get(k).and_then(Value::as_str))
            .map(str::to_string);
        match text {
            Some(text) => Ok(ProviderCallResult::ok(text, raw)),
            None => Ok(ProviderCallResult::failure(
                "custom response carried neither `text` nor `output`",
                raw,
            )),
        }
    }
}
