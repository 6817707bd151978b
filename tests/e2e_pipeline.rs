//! End-to-end pipeline tests.
//!
//! A stub OpenAI-compatible API stands in for the provider; the orchestrator
//! and the HTTP server run unmodified on top of it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{extract::State, response::IntoResponse, routing::post, Json, Router};
use futures::StreamExt;
use prompttrim::{
    config::Config,
    inference::Backends,
    orchestrator::{AccessProfile, AccessTier, InMemoryDirectory, RecordSink, RequestRecord},
    rules::OutputFormat,
    server::{create_router, AppState, ServerConfig},
    ChatRequest, CompressionEngine, Orchestrator, Provider, TokenAccountant,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Prompts received by the stub
type Seen = Arc<Mutex<Vec<String>>>;

async fn spawn(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}")
}

/// A 200-word answer made of varied sentences
fn long_answer() -> String {
    let sentences = [
        "Rust guarantees memory safety without a garbage collector by tracking ownership at compile time.",
        "Every value has a single owner and is dropped when that owner goes out of scope.",
        "Borrowing lets code read data through shared references or mutate it through one exclusive reference.",
        "The borrow checker rejects programs where references could outlive the data they point to.",
        "Lifetimes describe how long references remain valid and are usually inferred by the compiler.",
        "Traits define shared behaviour and allow generic functions to work across many concrete types.",
        "Zero cost abstractions mean iterators and closures compile down to efficient machine code.",
        "Cargo manages dependencies, builds projects, runs tests and publishes crates to the registry.",
    ];
    let mut words = Vec::new();
    for sentence in sentences.iter().cycle() {
        for word in sentence.split_whitespace() {
            if words.len() == 200 {
                return words.join(" ");
            }
            words.push(word.to_string());
        }
    }
    unreachable!()
}

async fn spawn_provider(seen: Seen) -> String {
    let router = Router::new()
        .route(
            "/v1/chat/completions",
            post(|State(seen): State<Seen>, Json(body): Json<Value>| async move {
                let prompt = body["messages"][0]["content"].as_str().unwrap_or_default().to_string();
                seen.lock().unwrap().push(prompt);

                if body["stream"] == true {
                    let sse = "data: {\"choices\":[{\"delta\":{\"content\":\"streamed \"}}]}\n\n\
                               data: {\"choices\":[{\"delta\":{\"content\":\"answer\"}}]}\n\n\
                               data: [DONE]\n\n";
                    return ([("content-type", "text/event-stream")], sse.to_string()).into_response();
                }
                Json(json!({"choices": [{"message": {"content": long_answer()}}]})).into_response()
            }),
        )
        .with_state(seen);
    spawn(router).await
}

fn config(base: &str) -> Config {
    let mut config = Config::default();
    config.providers.openai.api_key = Some("sk-test".into());
    config.providers.openai.endpoint = Some(format!("{base}/v1/chat/completions"));
    config.retry.backoff_ms = 1;
    config
}

const PROMPT: &str = "Could you please explain in a detailed and thorough way how the Rust \
                      ownership model, borrowing rules and lifetimes work together to \
                      prevent memory safety bugs such as use-after-free and data races?";

struct ChannelSink(mpsc::UnboundedSender<RequestRecord>);

#[async_trait]
impl RecordSink for ChannelSink {
    async fn record(&self, record: RequestRecord) -> prompttrim::Result<()> {
        let _ = self.0.send(record);
        Ok(())
    }
}

#[tokio::test]
async fn test_chat_compresses_and_reduces() {
    let seen = Seen::default();
    let base = spawn_provider(Arc::clone(&seen)).await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let orchestrator = Orchestrator::from_config(&config(&base), &Backends::lexical())
        .unwrap()
        .with_record_sink(Arc::new(ChannelSink(tx)));

    let request = ChatRequest::new("openai", PROMPT)
        .with_level("aggressive")
        .with_max_output_tokens(100);
    let response = timeout(Duration::from_secs(10), orchestrator.chat(&request, None))
        .await
        .expect("chat timed out")
        .unwrap();

    assert_eq!(response.provider, "openai");
    assert_eq!(response.model, "gpt-4o-mini");
    assert_eq!(response.optimization_level, "aggressive");
    assert_eq!(response.raw_output, long_answer());
    assert!(response.reduction_percent > 0.0);
    assert!((0.0..=1.0).contains(&response.quality_similarity));
    assert!(response.iterations_used <= 3);
    assert!(response.final_output.split_whitespace().count() < 200);

    // The provider saw the compressed prompt, not the original
    let sent = seen.lock().unwrap()[0].clone();
    let accountant = TokenAccountant::new();
    let original_tokens = accountant.count(PROMPT, Provider::OpenAI, "gpt-4o-mini").unwrap();
    let sent_tokens = accountant.count(&sent, Provider::OpenAI, "gpt-4o-mini").unwrap();
    assert!(sent_tokens < original_tokens);
    assert_eq!(response.prompt_tokens_est, accountant.estimate(&sent, Provider::OpenAI));

    let tokens = response.tokens.expect("openai carries an exact breakdown");
    assert_eq!(tokens.input.original, original_tokens);
    assert_eq!(tokens.input.compressed, sent_tokens);
    assert!(tokens.total_saved > 0);
    assert!((0.0..=1.0).contains(&tokens.efficiency));

    let record = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    assert_eq!(record.provider, "openai");
    assert_eq!(record.prompt_tokens_est, response.prompt_tokens_est);
}

#[tokio::test]
async fn test_chat_applies_rules() {
    let seen = Seen::default();
    let base = spawn_provider(seen).await;
    let orchestrator = Orchestrator::from_config(&config(&base), &Backends::lexical()).unwrap();

    let mut request = ChatRequest::new("openai", PROMPT).with_max_output_tokens(100);
    request.output_format = Some(OutputFormat::List);
    request.max_tokens = Some(10);

    let response = orchestrator.chat(&request, None).await.unwrap();
    assert!(response.final_output.starts_with("- "));
    assert!(response.final_output.ends_with("[TRUNCATED]"));
}

#[tokio::test]
async fn test_http_chat_uses_profile_tier() {
    let seen = Seen::default();
    let base = spawn_provider(Arc::clone(&seen)).await;
    let orchestrator = Orchestrator::from_config(&config(&base), &Backends::lexical()).unwrap();
    let directory = InMemoryDirectory::new().with_profile(
        "sk-user",
        AccessProfile {
            id: "dana".into(),
            optimization_level: Some(AccessTier::Named("minimal".into())),
        },
    );
    let state = AppState::with_directory(ServerConfig::default(), orchestrator, Arc::new(directory));
    let server = spawn(create_router(Arc::new(state))).await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{server}/api/llm/chat"))
        .bearer_auth("sk-user")
        .json(&json!({"provider": "openai", "prompt": PROMPT, "optimization_level": "aggressive"}))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["optimization_level"], "minimal");
    assert!(body["tokens"]["output"]["final"].is_u64());
}

#[tokio::test]
async fn test_http_missing_credential_is_400() {
    let orchestrator = Orchestrator::from_config(&Config::default(), &Backends::lexical()).unwrap();
    let server = spawn(create_router(Arc::new(AppState::new(ServerConfig::default(), orchestrator)))).await;

    let response = reqwest::Client::new()
        .post(format!("{server}/api/llm/chat"))
        .json(&json!({"provider": "grok", "prompt": "hello"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("GROK_API_KEY"));
}

#[tokio::test]
async fn test_http_stream_is_plain_text() {
    let seen = Seen::default();
    let base = spawn_provider(seen).await;
    let orchestrator = Orchestrator::from_config(&config(&base), &Backends::lexical()).unwrap();
    let server = spawn(create_router(Arc::new(AppState::new(ServerConfig::default(), orchestrator)))).await;

    let response = reqwest::Client::new()
        .post(format!("{server}/api/llm/stream"))
        .json(&json!({"provider": "openai", "prompt": PROMPT}))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/plain"));

    let mut body = String::new();
    let mut chunks = response.bytes_stream();
    while let Some(chunk) = chunks.next().await {
        body.push_str(&String::from_utf8_lossy(&chunk.unwrap()));
    }
    assert_eq!(body, "streamed answer");
}

#[tokio::test]
async fn test_http_chat_uses_configured_default_level() {
    let seen = Seen::default();
    let base = spawn_provider(Arc::clone(&seen)).await;
    let mut config = config(&base);
    config.compression.default_level = "aggressive".into();
    let orchestrator = Orchestrator::from_config(&config, &Backends::lexical()).unwrap();
    let server = spawn(create_router(Arc::new(AppState::new(ServerConfig::default(), orchestrator)))).await;

    let response = reqwest::Client::new()
        .post(format!("{server}/api/llm/chat"))
        .json(&json!({"provider": "openai", "prompt": PROMPT}))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["optimization_level"], "aggressive");

    let engine = CompressionEngine::new(TokenAccountant::new());
    let aggressive = engine.compress(PROMPT, 0.3, Provider::OpenAI).await;
    let moderate = engine.compress(PROMPT, 0.5, Provider::OpenAI).await;
    let sent = seen.lock().unwrap()[0].clone();
    assert_eq!(sent, aggressive.compressed_text);
    assert_ne!(sent, moderate.compressed_text);
}

#[tokio::test]
async fn test_http_contentless_reply_is_502() {
    let router = Router::new().route(
        "/v1/chat/completions",
        post(|| async { Json(json!({"id": "chatcmpl-1", "choices": []})) }),
    );
    let base = spawn(router).await;
    let orchestrator = Orchestrator::from_config(&config(&base), &Backends::lexical()).unwrap();
    let server = spawn(create_router(Arc::new(AppState::new(ServerConfig::default(), orchestrator)))).await;

    let response = reqwest::Client::new()
        .post(format!("{server}/api/llm/chat"))
        .json(&json!({"provider": "openai", "prompt": PROMPT}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 502);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("no message content"));
}
