//! Topology cache errors.

use crate::interfaces::{CacheError, StoreError, StreamError};

/// Result type for topology operations.
pub type Result<T> = std::result::Result<T, TopoError>;

/// Errors from topology generation, caching and watching.
#[derive(Debug, thiserror::Error)]
pub enum TopoError {
    /// Unknown topology type. A configuration error; never retried.
    #[error("invalid topology type: {0}")]
    InvalidTopoType(String),

    #[error("business {biz_id} not found in tenant {tenant}")]
    BizNotFound { tenant: String, biz_id: i64 },

    /// A document or node does not have the expected shape.
    #[error("invalid {kind} node {id}: {reason}")]
    InvalidNode {
        kind: String,
        id: i64,
        reason: String,
    },

    #[error("unknown resource table: {0}")]
    UnknownTable(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Stream(#[from] StreamError),
}

impl From<serde_json::Error> for TopoError {
    fn from(err: serde_json::Error) -> Self {
        TopoError::Serialization(err.to_string())
    }
}
