//! HTTP request handlers.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Json, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::state::AppState;
use crate::compression::{ratio_for_level, CompressionResult};
use crate::error::TrimError;
use crate::models::Encoding;
use crate::orchestrator::{AccessProfile, ChatRequest, ChatResponse, ReduceRequest, ReduceResponse};

/// Header carrying an explicit caller id
pub const USER_ID_HEADER: &str = "x-user-id";

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let max_body_size = state.config.max_body_size;
    let logging = state.config.logging;
    let cors = state.config.cors_enabled;

    let mut router = Router::new()
        // Health and status
        .route("/health", get(health_check))
        .route("/status", get(status))
        // Gateway
        .route("/api/llm/chat", post(chat))
        .route("/api/llm/stream", post(stream))
        // Standalone pipeline stages
        .route("/api/output/reduce", post(reduce_output))
        .route("/api/compress", post(compress))
        .route("/api/tokens/count", post(count_tokens))
        .layer(DefaultBodyLimit::max(max_body_size))
        .with_state(state);

    if logging {
        router = router.layer(TraceLayer::new_for_http());
    }
    if cors {
        router = router.layer(CorsLayer::permissive());
    }
    router
}

/// Error body returned by every handler
pub struct ApiError(pub TrimError);

impl From<TrimError> for ApiError {
    fn from(e: TrimError) -> Self {
        Self(e)
    }
}

/// HTTP status for a pipeline error
pub fn error_status(e: &TrimError) -> StatusCode {
    if e.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        match e {
            TrimError::Network(_) | TrimError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = error_status(&self.0);
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        }
        (status, Json(json!({"error": self.0.to_string()}))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    /// Always "ok"
    pub status: &'static str,
    /// Crate version
    pub version: &'static str,
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Status response
#[derive(Serialize)]
pub struct StatusResponse {
    /// Always "ok"
    pub status: &'static str,
    /// Crate version
    pub version: &'static str,
    /// Seconds since startup
    pub uptime_secs: u64,
    /// Registered provider ids
    pub providers: Vec<String>,
    /// Provider ids with credentials present
    pub configured_providers: Vec<String>,
    /// Provider ids that can stream
    pub streaming_providers: Vec<String>,
    /// Quality acceptance threshold
    pub similarity_threshold: f32,
}

/// Status endpoint
async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let gateway = state.orchestrator.gateway();
    let providers = gateway.provider_ids();
    let streaming_providers = providers
        .iter()
        .filter(|id| gateway.supports_streaming(id))
        .cloned()
        .collect();

    Json(StatusResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.uptime().as_secs(),
        configured_providers: gateway.configured_providers(),
        providers,
        streaming_providers,
        similarity_threshold: state.orchestrator.similarity_threshold(),
    })
}

/// Caller profile from `Authorization: Bearer` or the user-id header
async fn caller(state: &AppState, headers: &HeaderMap) -> Option<AccessProfile> {
    let key = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|k| !k.is_empty());
    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty());

    state.resolve_profile(key, user_id).await
}

/// Synchronous gateway call
async fn chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> ApiResult<ChatResponse> {
    let profile = caller(&state, &headers).await;
    let response = state.orchestrator.chat(&req, profile.as_ref()).await?;
    Ok(Json(response))
}

/// Streaming gateway call; chunks are forwarded as plain text
async fn stream(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let profile = caller(&state, &headers).await;
    let chunks = state.orchestrator.stream(&req, profile.as_ref()).await?;

    let body = Body::from_stream(chunks.map(Ok::<_, Infallible>));
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}

/// Output-only reduction
async fn reduce_output(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReduceRequest>,
) -> ApiResult<ReduceResponse> {
    let report = state.orchestrator.reduce_output(&req).await?;
    Ok(Json(report))
}

fn default_provider() -> String {
    "openai".to_string()
}

/// Compress request
#[derive(Debug, Deserialize)]
pub struct CompressRequest {
    /// Prompt to compress
    pub text: String,
    /// Provider whose token accounting applies
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Explicit ratio, overriding the level
    #[serde(default)]
    pub ratio: Option<f64>,
    /// Level name (configured default when absent)
    #[serde(default)]
    pub optimization_level: Option<String>,
}

/// Input-only compression
async fn compress(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CompressRequest>,
) -> ApiResult<CompressionResult> {
    let ratio = match (req.ratio, req.optimization_level.as_deref()) {
        (Some(ratio), _) if ratio > 0.0 && ratio <= 1.0 => ratio,
        (Some(ratio), _) => {
            return Err(TrimError::InvalidRequest(format!("ratio must be within (0, 1], got {ratio}")).into())
        },
        (None, level) => ratio_for_level(level.unwrap_or(state.orchestrator.default_level())),
    };

    let result = state
        .orchestrator
        .compress_input(&req.text, ratio, &req.provider)
        .await?;
    Ok(Json(result))
}

/// Token count request
#[derive(Debug, Deserialize)]
pub struct CountRequest {
    /// Texts to count (a single `text` is accepted too)
    #[serde(default)]
    pub texts: Vec<String>,
    /// Single text, counted after `texts`
    #[serde(default)]
    pub text: Option<String>,
    /// Provider id
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model (provider default when absent)
    #[serde(default)]
    pub model: Option<String>,
}

/// Token count response
#[derive(Debug, Serialize, Deserialize)]
pub struct CountResponse {
    /// Provider id
    pub provider: String,
    /// Model the counts apply to
    pub model: String,
    /// Encoding name
    pub encoding: String,
    /// Whether counts come from a real tokenizer
    pub exact: bool,
    /// Per-text counts, in request order
    pub counts: Vec<usize>,
    /// Sum of `counts`
    pub total: usize,
}

/// Batch token accounting
async fn count_tokens(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CountRequest>,
) -> ApiResult<CountResponse> {
    let gateway = state.orchestrator.gateway();
    let family = gateway.resolve(&req.provider)?.family();
    let model = gateway.effective_model(&req.provider, req.model.as_deref())?;

    let mut texts = req.texts;
    texts.extend(req.text);
    if texts.is_empty() {
        return Err(TrimError::InvalidRequest("no text to count".into()).into());
    }

    let counts = state.accountant().count_batch(texts.as_slice(), family, &model)?;
    let encoding = Encoding::for_provider(family, &model);

    Ok(Json(CountResponse {
        provider: family.id().to_string(),
        model,
        encoding: encoding.name().to_string(),
        exact: encoding.is_exact(),
        total: counts.iter().sum(),
        counts,
    }))
}

#[cfg(test)]
mod tests {
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;
    use crate::inference::Backends;
    use crate::orchestrator::Orchestrator;
    use crate::server::ServerConfig;

    fn router() -> Router {
        let orchestrator = Orchestrator::from_config(&Config::default(), &Backends::lexical()).unwrap();
        create_router(Arc::new(AppState::new(ServerConfig::default(), orchestrator)))
    }

    async fn send(router: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(error_status(&TrimError::Config("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            error_status(&TrimError::UnsupportedProvider("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(error_status(&TrimError::Network("x".into())), StatusCode::BAD_GATEWAY);
        assert_eq!(
            error_status(&TrimError::Upstream {
                status: 503,
                message: "x".into()
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            error_status(&TrimError::Server("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(router(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_status_lists_providers() {
        let (status, body) = send(router(), "GET", "/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["providers"], json!(["anthropic", "custom", "grok", "openai"]));
        assert_eq!(body["streaming_providers"], json!(["openai"]));
    }

    #[tokio::test]
    async fn test_chat_unknown_provider_is_400() {
        let (status, body) = send(
            router(),
            "POST",
            "/api/llm/chat",
            Some(json!({"provider": "cohere", "prompt": "hello"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("cohere"));
    }

    #[tokio::test]
    async fn test_stream_non_streaming_provider_is_400() {
        let (status, _) = send(
            router(),
            "POST",
            "/api/llm/stream",
            Some(json!({"provider": "anthropic", "prompt": "hello"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_reduce_short_text() {
        let (status, body) = send(
            router(),
            "POST",
            "/api/output/reduce",
            Some(json!({"text": "Short answer.", "max_length": 50})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["output"], "Short answer.");
        assert_eq!(body["iterations_used"], 0);
    }

    #[tokio::test]
    async fn test_compress_rejects_bad_ratio() {
        let (status, _) = send(
            router(),
            "POST",
            "/api/compress",
            Some(json!({"text": "some words here", "ratio": 1.5})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_compress_by_level() {
        let (status, body) = send(
            router(),
            "POST",
            "/api/compress",
            Some(json!({
                "text": "Please provide a detailed explanation of Kubernetes pod scheduling and eviction",
                "provider": "grok",
                "optimization_level": "aggressive"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(!body["compressed_text"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_count_tokens() {
        let (status, body) = send(
            router(),
            "POST",
            "/api/tokens/count",
            Some(json!({"texts": ["hello world", ""], "provider": "openai"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["exact"], true);
        assert_eq!(body["counts"][1], 0);
        assert_eq!(body["total"], body["counts"][0]);

        let (_, body) = send(
            router(),
            "POST",
            "/api/tokens/count",
            Some(json!({"text": "abcdefgh", "provider": "anthropic"})),
        )
        .await;
        assert_eq!(body["exact"], false);
        assert_eq!(body["counts"], json!([2]));
    }

    #[tokio::test]
    async fn test_count_requires_text() {
        let (status, _) = send(router(), "POST", "/api/tokens/count", Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
