//! PromptTrim HTTP server.
//!
//! Exposes the pipeline over HTTP:
//! - `/api/llm/chat` and `/api/llm/stream` (gateway calls)
//! - `/api/output/reduce`, `/api/compress`, `/api/tokens/count` (single stages)
//! - `/health`, `/status`
//!
//! # Example
//!
//! ```rust,ignore
//! use prompttrim::server::{serve, ServerConfig};
//!
//! let config = Config::load(None)?;
//! serve(&config).await?;
//! ```

mod config;
mod handlers;
mod state;

use std::sync::Arc;

use tokio::net::TcpListener;

use crate::error::{Result, TrimError};
use crate::inference::Backends;
use crate::orchestrator::{InMemoryDirectory, Orchestrator, TracingSink};

pub use config::ServerConfig;
pub use handlers::{create_router, error_status, health_check, ApiError, CountResponse, USER_ID_HEADER};
pub use state::AppState;

/// Build shared state from configuration
pub fn build_state(config: &crate::config::Config) -> Result<AppState> {
    let backends = Backends::from_config(&config.backends)?;
    let orchestrator = Orchestrator::from_config(config, &backends)?.with_record_sink(Arc::new(TracingSink));
    let directory = InMemoryDirectory::from_entries(&config.profiles);
    tracing::info!(profiles = directory.len(), "Profile directory loaded");

    Ok(AppState::with_directory(
        ServerConfig::from_settings(&config.server)?,
        orchestrator,
        Arc::new(directory),
    ))
}

/// Serve until Ctrl-C
pub async fn serve(config: &crate::config::Config) -> Result<()> {
    let state = Arc::new(build_state(config)?);
    let addr = state.config.addr;
    let router = create_router(Arc::clone(&state));

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| TrimError::Server(format!("Failed to bind to {}: {}", addr, e)))?;
    tracing::info!(
        providers = ?state.orchestrator.gateway().configured_providers(),
        "PromptTrim listening on http://{}",
        addr
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| TrimError::Server(format!("Server error: {}", e)))?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to install Ctrl-C handler: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
