//! # PromptTrim - token-saving LLM gateway
//!
//! Cuts the token cost of LLM calls on both sides of the wire: prompts are
//! compressed toward a target ratio before they are sent, and responses are
//! shrunk by a quality-controlled summarization loop before they are returned.
//!
//! ## Features
//!
//! - **Token accounting**: exact BPE counts for OpenAI models, a character
//!   heuristic for everything else
//! - **Prompt compression**: model-backed rewrite with a deterministic
//!   word-importance fallback, so compression never fails
//! - **Multi-provider gateway**: OpenAI, Anthropic, Grok and a custom endpoint
//!   behind one interface, with bounded exponential-backoff retries
//! - **Quality control**: iterative summarization that stops once semantic
//!   similarity to the original reaches a threshold
//! - **Output rules**: PII redaction, format coercion and token-budget
//!   truncation
//!
//! ## Pipeline
//!
//! ```text
//!  prompt ──> CompressionEngine ──> ProviderGateway ──> QualityController
//!                                         │                     │
//!                                    RetryPolicy                v
//!                                                        RulesEnforcer ──> response
//!                                                               │
//!                                              TokenAccountant (estimates, breakdown)
//! ```
//!
//! Steps run in that order for each request. Nothing is shared between
//! requests except read-only configuration and lazily-initialized tokenizer
//! tables.
//!
//! ## Quick Start
//!
//! ### Compression Only
//!
//! ```
//! use prompttrim::{CompressionEngine, Provider, TokenAccountant};
//!
//! # tokio_test::block_on(async {
//! let engine = CompressionEngine::new(TokenAccountant::new());
//! let result = engine
//!     .compress("Could you please summarize the Q3 revenue report for the board", 0.5, Provider::OpenAI)
//!     .await;
//! println!("{} -> {} tokens", result.original_token_count, result.compressed_token_count);
//! # });
//! ```
//!
//! ### Full Gateway Call
//!
//! ```rust,ignore
//! use prompttrim::{Backends, ChatRequest, Config, Orchestrator};
//!
//! let config = Config::load(None)?;
//! let orchestrator = Orchestrator::from_config(&config, &Backends::from_config(&config.backends)?)?;
//!
//! let request = ChatRequest::new("openai", "Explain the CAP theorem").with_level("aggressive");
//! let response = orchestrator.chat(&request, None).await?;
//! println!("{}", response.final_output);
//! ```
//!
//! ### HTTP Server
//!
//! ```rust,ignore
//! use prompttrim::{server, Config};
//!
//! server::serve(&Config::load(None)?).await?;
//! ```
//!
//! ## Modules
//!
//! - [`tokenizer`]: token counting and truncation
//! - [`compression`]: ratio-driven prompt compression
//! - [`gateway`]: provider variants, retry policy, streaming
//! - [`quality`]: similarity-gated output reduction
//! - [`rules`]: redaction, format coercion, truncation
//! - [`orchestrator`]: the end-to-end request flow and its collaborators
//! - [`inference`]: pluggable reducer and similarity backends
//! - [`server`]: HTTP surface

pub mod compression;
pub mod config;
pub mod error;
pub mod gateway;
pub mod inference;
pub mod models;
pub mod orchestrator;
pub mod quality;
pub mod rules;
pub mod server;
pub mod tokenizer;

// Re-exports for convenience
pub use compression::{CompressionEngine, CompressionLevel, CompressionResult, CompressionStrategy};
pub use config::Config;
pub use error::{Result, TrimError};
pub use gateway::{LlmProvider, ProviderCallResult, ProviderGateway, RetryPolicy};
pub use inference::{Backends, SimilarityScorer, TextReducer};
pub use models::{Encoding, Provider};
pub use orchestrator::{ChatRequest, ChatResponse, Orchestrator, ReduceRequest, TokenBreakdown};
pub use quality::{QualityController, QualityReport, QualitySummaryResult};
pub use rules::{OutputFormat, RulesConfig, RulesEnforcer};
pub use server::{AppState, ServerConfig};
pub use tokenizer::{count_tokens_with_encoding, TokenAccountant};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
