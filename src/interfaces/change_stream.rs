//! Change stream (CDC) interface and watch token persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::document_store::Document;

/// Result type for change stream operations.
pub type Result<T> = std::result::Result<T, StreamError>;

/// Errors from change stream and token store operations.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The stored resume position can no longer be used (expired from the
    /// oplog, malformed). The watcher must reset and start from now.
    #[error("watch token lost: {0}")]
    TokenLost(String),

    #[error("change stream error: {0}")]
    Stream(String),

    #[error("token store error: {0}")]
    TokenStore(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StreamError {
    fn from(err: redis::RedisError) -> Self {
        StreamError::TokenStore(err.to_string())
    }
}

/// Operation type of a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    Insert,
    Update,
    Replace,
    Delete,
    /// Anything else (drop, rename, invalidate, ...).
    Other,
}

/// One change event.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// Tenant owning the collection the event came from.
    pub tenant: String,
    /// Table name without the tenant prefix.
    pub table: String,
    /// Opaque document id.
    pub oid: String,
    pub operation: OperationType,
    /// Names of the fields changed by an update.
    pub updated_fields: Vec<String>,
    /// Full document for inserts and updates. For deletes the watcher fills
    /// this from the deleted-document archive before dispatching.
    pub document: Option<Document>,
    /// Resume token positioned right after this event.
    pub token: String,
    pub cluster_time: DateTime<Utc>,
}

impl ChangeEvent {
    /// Whether an update touched `field`.
    pub fn updated(&self, field: &str) -> bool {
        self.updated_fields.iter().any(|f| f == field)
    }
}

/// Resumable position of a watch.
///
/// `token` wins over `start_at` when both are set. A position with neither
/// starts from the current time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchToken {
    pub token: Option<String>,
    pub start_at: Option<DateTime<Utc>>,
}

impl WatchToken {
    /// Position that starts from now, dropping any stored token.
    pub fn reset_now() -> Self {
        Self {
            token: None,
            start_at: Some(Utc::now()),
        }
    }

    /// Position right after an observed event.
    pub fn after(event: &ChangeEvent) -> Self {
        Self {
            token: Some(event.token.clone()),
            start_at: Some(event.cluster_time),
        }
    }
}

/// An open subscription on one table across all tenants.
#[async_trait]
pub trait EventCursor: Send {
    /// Wait for the next batch of at most `max` events.
    ///
    /// Blocks until at least one event is available; an empty batch means the
    /// stream went idle and the caller should simply call again.
    async fn next_batch(&mut self, max: usize) -> Result<Vec<ChangeEvent>>;
}

/// Interface for the CDC source.
///
/// # Implementations
///
/// - `MongoChangeStream`: MongoDB change streams
/// - `MockChangeStream`: in-memory channels for testing
#[async_trait]
pub trait ChangeStream: Send + Sync {
    /// Subscribe to changes of `table` in every tenant, starting at `from`.
    async fn subscribe(&self, table: &str, from: &WatchToken) -> Result<Box<dyn EventCursor>>;

    /// Look up archived copies of deleted documents, keyed by opaque id.
    async fn deleted_documents(
        &self,
        tenant: &str,
        table: &str,
        oids: &[String],
    ) -> Result<std::collections::HashMap<String, Document>>;
}

/// Interface for watch token persistence.
///
/// Tracks the last acknowledged position per watch so a restarted watcher
/// resumes instead of rescanning or missing events.
///
/// # Implementations
///
/// - `RedisTokenStore`: Redis storage
/// - `MockTokenStore`: in-memory mock for testing
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Get the stored position for a watch, `None` if never stored.
    async fn get(&self, name: &str) -> Result<Option<WatchToken>>;

    /// Store the position for a watch, replacing any previous one.
    async fn put(&self, name: &str, token: &WatchToken) -> Result<()>;
}
