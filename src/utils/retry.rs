//! Retry utilities: backoff builders for CDC batches and backend connections.
//!
//! Uses `backon`. Batch retries are constant so a stuck batch is retried at a
//! predictable pace; connection retries back off exponentially with jitter.

use std::time::Duration;

use backon::{ConstantBuilder, ExponentialBuilder};

use crate::config::WatchConfig;
use crate::interfaces::{CacheError, StoreError, StreamError};
use crate::topo::TopoError;

/// Backoff for a change event batch whose handler failed.
///
/// Defaults to 10 retries, 1s apart.
pub fn batch_backoff(config: &WatchConfig) -> ConstantBuilder {
    ConstantBuilder::default()
        .with_delay(config.retry_interval())
        .with_max_times(config.max_retries)
}

/// Backoff for backend connection retries at startup.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Max attempts: 30
/// - Jitter enabled
pub fn connection_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(30)
        .with_jitter()
}

/// Whether retrying the failed operation can succeed.
///
/// Backend I/O failures are transient. Configuration and data shape errors
/// fail the same way every time, as does a business that no longer exists.
pub fn is_retryable(err: &TopoError) -> bool {
    match err {
        TopoError::Cache(CacheError::Backend(_) | CacheError::Connection(_)) => true,
        TopoError::Store(StoreError::Database(_)) => true,
        TopoError::Stream(StreamError::Stream(_) | StreamError::TokenStore(_)) => true,
        TopoError::BizNotFound { .. }
        | TopoError::InvalidTopoType(_)
        | TopoError::InvalidNode { .. }
        | TopoError::UnknownTable(_)
        | TopoError::Serialization(_)
        | TopoError::Store(_)
        | TopoError::Stream(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use backon::BackoffBuilder;

    use super::*;

    #[test]
    fn test_batch_backoff_follows_config() {
        let config = WatchConfig {
            max_retries: 3,
            retry_interval_ms: 20,
            ..Default::default()
        };
        let delays: Vec<Duration> = batch_backoff(&config).build().collect();
        assert_eq!(delays, vec![Duration::from_millis(20); 3]);
    }

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(&TopoError::Cache(CacheError::Connection(
            "refused".to_string()
        ))));
        assert!(is_retryable(&TopoError::Store(StoreError::Database(
            "timeout".to_string()
        ))));
        assert!(!is_retryable(&TopoError::InvalidTopoType("x".to_string())));
        assert!(!is_retryable(&TopoError::InvalidNode {
            kind: "set".to_string(),
            id: 1,
            reason: "bad".to_string(),
        }));
        assert!(!is_retryable(&TopoError::Store(StoreError::InvalidFilter(
            "bad".to_string()
        ))));
        assert!(!is_retryable(&TopoError::BizNotFound {
            tenant: "t1".to_string(),
            biz_id: 7,
        }));
    }
}
