//! External collaborators consumed by the orchestrator.
//!
//! - [`ProfileDirectory`]: caller lookup by id or opaque key, yielding an
//!   access-tier hint
//! - [`RecordSink`]: fire-and-forget persistence of request records
//!
//! Both are traits so deployments can plug in a real store. The in-crate
//! implementations are read-only after construction.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::compression::CompressionLevel;
use crate::config::ProfileEntry;
use crate::error::Result;

/// Access tier: numeric (1, 2, 3) or a level name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AccessTier {
    /// 1 = minimal, 2 = moderate, 3 = aggressive
    Numeric(u8),
    /// Level name
    Named(String),
}

impl AccessTier {
    /// Compression level this tier maps to, if recognised
    pub fn level(&self) -> Option<CompressionLevel> {
        match self {
            AccessTier::Numeric(tier) => CompressionLevel::from_tier(*tier),
            AccessTier::Named(name) => CompressionLevel::from_name(name),
        }
    }
}

/// Caller profile as seen by the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessProfile {
    /// Caller identifier
    pub id: String,
    /// Pre-provisioned tier overriding the requested level
    #[serde(default)]
    pub optimization_level: Option<AccessTier>,
}

/// Caller lookup
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    /// Look up by caller id
    async fn by_id(&self, id: &str) -> Result<Option<AccessProfile>>;

    /// Look up by opaque API key
    async fn by_key(&self, key: &str) -> Result<Option<AccessProfile>>;
}

/// Static directory built at startup
#[derive(Debug, Clone, Default)]
pub struct InMemoryDirectory {
    profiles: HashMap<String, AccessProfile>,
    keys: HashMap<String, String>,
}

impl InMemoryDirectory {
    /// Empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory seeded from configuration
    pub fn from_entries(entries: &[ProfileEntry]) -> Self {
        entries.iter().fold(Self::new(), |dir, entry| {
            dir.with_profile(
                &entry.key,
                AccessProfile {
                    id: entry.id.clone(),
                    optimization_level: entry.optimization_level.clone(),
                },
            )
        })
    }

    /// Add a profile reachable by `key` and by its id
    pub fn with_profile(mut self, key: &str, profile: AccessProfile) -> Self {
        self.keys.insert(key.to_string(), profile.id.clone());
        self.profiles.insert(profile.id.clone(), profile);
        self
    }

    /// Number of profiles
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Whether the directory is empty
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[async_trait]
impl ProfileDirectory for InMemoryDirectory {
    async fn by_id(&self, id: &str) -> Result<Option<AccessProfile>> {
        Ok(self.profiles.get(id).cloned())
    }

    async fn by_key(&self, key: &str) -> Result<Option<AccessProfile>> {
        Ok(self
            .keys
            .get(key)
            .and_then(|id| self.profiles.get(id))
            .cloned())
    }
}

/// One completed chat request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    /// Record id
    pub id: Uuid,
    /// Completion time
    pub timestamp: DateTime<Utc>,
    /// Caller, when known
    pub user_id: Option<String>,
    /// Provider id
    pub provider: String,
    /// Effective model
    pub model: String,
    /// Effective level
    pub optimization_level: String,
    /// Estimated prompt tokens after compression
    pub prompt_tokens_est: usize,
    /// Estimated final output tokens
    pub output_tokens_est: usize,
    /// Output word reduction
    pub reduction_percent: f64,
    /// Output similarity to the raw response
    pub quality_similarity: f32,
}

impl RequestRecord {
    /// Fresh record stamped now
    pub fn new(provider: &str, model: &str, optimization_level: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            user_id: None,
            provider: provider.to_string(),
            model: model.to_string(),
            optimization_level: optimization_level.to_string(),
            prompt_tokens_est: 0,
            output_tokens_est: 0,
            reduction_percent: 0.0,
            quality_similarity: 0.0,
        }
    }
}

/// Request record persistence
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Store one record
    async fn record(&self, record: RequestRecord) -> Result<()>;
}

/// Sink that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

#[async_trait]
impl RecordSink for TracingSink {
    async fn record(&self, record: RequestRecord) -> Result<()> {
        tracing::info!(
            id = %record.id,
            provider = %record.provider,
            model = %record.model,
            level = %record.optimization_level,
            prompt_tokens = record.prompt_tokens_est,
            output_tokens = record.output_tokens_est,
            reduction_percent = record.reduction_percent,
            similarity = record.quality_similarity,
            "Request completed"
        );
        Ok(())
    }
}

/// Hand `record` to `sink` on a detached task; failures are only logged
pub fn dispatch_record(sink: Arc<dyn RecordSink>, record: RequestRecord) {
    tokio::spawn(async move {
        let id = record.id;
        if let Err(e) = sink.record(record).await {
            tracing::warn!(%id, "Failed to persist request record: {}", e);
        }
    });
}
