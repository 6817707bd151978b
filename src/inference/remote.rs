//! HTTP inference backends.
//!
//! Both speak the common inference-API shape: `{"inputs": ..., "parameters": {...}}`.
//! Summarizers answer `[{"summary_text": "..."}]`, text generators answer
//! `[{"generated_text": "..."}]`, embedders answer one vector per input.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::lexical::cosine_similarity;
use super::{ReduceParams, SimilarityScorer, TextReducer};
use crate::error::{Result, TrimError};
use crate::gateway::post_json;

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| TrimError::Network(format!("Failed to create HTTP client: {e}")))
}

/// Summarizer or text generator behind an HTTP endpoint
#[derive(Debug, Clone)]
pub struct RemoteReducer {
    name: String,
    url: String,
    token: Option<String>,
    client: Client,
}

impl RemoteReducer {
    /// Create a reducer posting to `url`
    pub fn new(name: &str, url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            url: url.to_string(),
            token,
            client: build_client(timeout)?,
        })
    }
}

/// Pull the generated text out of an inference-API reply
fn extract_text(body: &Value) -> Option<String> {
    let item = match body {
        Value::Array(items) => items.first()?,
        other => other,
    };
    ["summary_text", "generated_text", "text"]
        .iter()
        .find_map(|key| item.get(key).and_then(Value::as_str))
        .map(str::to_string)
}

#[async_trait]
impl TextReducer for RemoteReducer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn reduce(&self, text: &str, params: &ReduceParams) -> Result<String> {
        let payload = json!({
            "inputs": params.render(text),
            "parameters": {
                "max_length": params.max_length,
                "min_length": params.min_length,
                "max_new_tokens": params.max_length,
                "do_sample": params.sample,
                "return_full_text": false,
            }
        });

        let mut request = self.client.post(&self.url).json(&payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let body = post_json(request).await?;
        extract_text(&body)
            .map(|t| t.trim().to_string())
            .ok_or_else(|| TrimError::Inference(format!("{}: reply carried no text", self.name)))
    }
}

/// Sentence-embedding endpoint scored with cosine similarity
#[derive(Debug, Clone)]
pub struct RemoteEmbedder {
    url: String,
    token: Option<String>,
    client: Client,
}

impl RemoteEmbedder {
    /// Create an embedder posting to `url`
    pub fn new(url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            url: url.to_string(),
            token,
            client: build_client(timeout)?,
        })
    }
}

fn parse_vectors(body: &Value) -> Option<Vec<Vec<f32>>> {
    body.as_array()?
        .iter()
        .map(|row| {
            row.as_array()?
                .iter()
                .map(|x| x.as_f64().map(|x| x as f32))
                .collect()
        })
        .collect()
}

#[async_trait]
impl SimilarityScorer for RemoteEmbedder {
    fn name(&self) -> &str {
        "embedding"
    }

    async fn similarity(&self, a: &str, b: &str) -> Result<f32> {
        let mut request = self.client.post(&self.url).json(&json!({ "inputs": [a, b] }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let body = post_json(request).await?;
        match parse_vectors(&body).as_deref() {
            Some([va, vb]) => Ok(cosine_similarity(va, vb).clamp(0.0, 1.0)),
            _ => Err(TrimError::Inference(
                "embedding reply must hold exactly two vectors".to_string(),
            )),
        }
    }
}
