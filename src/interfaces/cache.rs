//! Key-value cache interface.

use std::time::Duration;

use async_trait::async_trait;

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors from cache operations.
///
/// A missing key is never an error: reads return `None` instead.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache connection error: {0}")]
    Connection(String),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() {
            CacheError::Connection(err.to_string())
        } else {
            CacheError::Backend(err.to_string())
        }
    }
}

/// One command of a pipelined batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOp {
    /// SET with expiry.
    Set {
        key: String,
        value: String,
        ttl: Duration,
    },
    /// DEL of one or more keys.
    Del(Vec<String>),
    /// SADD members to a set.
    SAdd { key: String, members: Vec<String> },
    /// SREM members from a set.
    SRem { key: String, members: Vec<String> },
    /// EXPIRE a key.
    Expire { key: String, ttl: Duration },
}

/// Interface for the shared key-value cache.
///
/// Every operation is atomic per key; there is no cross-key locking. Batches
/// sent through `pipeline` are sent in one round trip but are not a
/// transaction.
///
/// # Implementations
///
/// - `RedisCache`: Redis via a connection manager
/// - `MockCache`: in-memory cache for testing
#[async_trait]
pub trait KvCache: Send + Sync {
    /// Get a string value. `None` if the key does not exist.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a string value with expiry.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Check whether a key exists.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Delete keys. Missing keys are ignored.
    async fn del(&self, keys: &[String]) -> Result<()>;

    /// Add members to a set.
    async fn sadd(&self, key: &str, members: &[String]) -> Result<()>;

    /// Remove members from a set.
    async fn srem(&self, key: &str, members: &[String]) -> Result<()>;

    /// Scan a set from `cursor`, returning the next cursor and a page of members.
    ///
    /// A returned cursor of `0` means the scan is complete.
    async fn sscan(&self, key: &str, cursor: u64, count: usize) -> Result<(u64, Vec<String>)>;

    /// Get many values at once, positionally aligned with `keys`.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>>;

    /// Set a key's expiry.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Execute a batch of commands in one round trip.
    async fn pipeline(&self, ops: Vec<CacheOp>) -> Result<()>;
}
