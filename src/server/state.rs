//! Shared server state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::config::ServerConfig;
use crate::orchestrator::{AccessProfile, InMemoryDirectory, Orchestrator, ProfileDirectory};
use crate::tokenizer::TokenAccountant;

/// Application state shared across handlers (read-only after startup)
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,
    /// Request pipeline
    pub orchestrator: Orchestrator,
    /// Caller lookup
    pub directory: Arc<dyn ProfileDirectory>,
    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    /// State with an empty profile directory
    pub fn new(config: ServerConfig, orchestrator: Orchestrator) -> Self {
        Self::with_directory(config, orchestrator, Arc::new(InMemoryDirectory::new()))
    }

    /// State with a custom profile directory
    pub fn with_directory(
        config: ServerConfig,
        orchestrator: Orchestrator,
        directory: Arc<dyn ProfileDirectory>,
    ) -> Self {
        Self {
            config,
            orchestrator,
            directory,
            start_time: Instant::now(),
        }
    }

    /// Get server uptime
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Token accountant used by the pipeline
    pub fn accountant(&self) -> &TokenAccountant {
        self.orchestrator.accountant()
    }

    /// Resolve the caller from a bearer key or an explicit user id.
    ///
    /// Lookup failures are logged and treated as anonymous.
    pub async fn resolve_profile(&self, key: Option<&str>, user_id: Option<&str>) -> Option<AccessProfile> {
        let lookup = match (key, user_id) {
            (Some(key), _) => self.directory.by_key(key).await,
            (None, Some(id)) => self.directory.by_id(id).await,
            (None, None) => return None,
        };
        match lookup {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!("Profile lookup failed: {}", e);
                None
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::inference::Backends;
    use crate::orchestrator::AccessTier;

    fn state() -> AppState {
        let orchestrator = Orchestrator::from_config(&Config::default(), &Backends::lexical()).unwrap();
        let directory = InMemoryDirectory::new().with_profile(
            "sk-test",
            AccessProfile {
                id: "carol".into(),
                optimization_level: Some(AccessTier::Numeric(2)),
            },
        );
        AppState::with_directory(ServerConfig::default(), orchestrator, Arc::new(directory))
    }

    #[tokio::test]
    async fn test_resolve_profile() {
        let state = state();
        assert_eq!(
            state.resolve_profile(Some("sk-test"), None).await.map(|p| p.id),
            Some("carol".to_string())
        );
        assert!(state.resolve_profile(None, Some("carol")).await.is_some());
        assert!(state.resolve_profile(Some("sk-other"), Some("carol")).await.is_none());
        assert!(state.resolve_profile(None, None).await.is_none());
    }

    #[test]
    fn test_uptime_advances() {
        let state = state();
        assert!(state.uptime() < Duration::from_secs(5));
    }
}
