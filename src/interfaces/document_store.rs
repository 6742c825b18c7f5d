//! Document store query interface.
//!
//! The primary store is tenant-sharded: every table exists once per tenant.
//! Documents are exchanged as JSON maps so the topology code stays
//! independent of the backend's native document type.

use async_trait::async_trait;
use serde_json::Value;

/// A stored document.
pub type Document = serde_json::Map<String, Value>;

/// Result type for document store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors from document store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

#[cfg(feature = "mongodb")]
impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// Resolve a dotted path inside a document.
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Query filter.
///
/// Field names may be dotted to reach into embedded documents (`ref.id`).
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every document.
    All,
    /// Field equals value.
    Eq(String, Value),
    /// Field is one of the values.
    In(String, Vec<Value>),
    /// Field is strictly greater than value.
    Gt(String, Value),
    /// Document's opaque id is one of the given ids.
    Oids(Vec<String>),
    /// All sub-filters match.
    And(Vec<Filter>),
    /// Any sub-filter matches.
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn in_ids(field: impl Into<String>, ids: &[i64]) -> Self {
        Filter::In(field.into(), ids.iter().map(|id| Value::from(*id)).collect())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Gt(field.into(), value.into())
    }

    /// Combine with another filter, flattening nested `And`s.
    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And(mut a), Filter::And(b)) => {
                a.extend(b);
                Filter::And(a)
            }
            (Filter::And(mut a), f) => {
                a.push(f);
                Filter::And(a)
            }
            (f, Filter::And(mut b)) => {
                b.insert(0, f);
                Filter::And(b)
            }
            (a, b) => Filter::And(vec![a, b]),
        }
    }
}

/// Find options: projection, ascending sort, and limit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Fields to return. Empty returns whole documents.
    pub fields: Vec<String>,
    /// Field to sort ascending by.
    pub sort: Option<String>,
    /// Maximum number of documents.
    pub limit: Option<i64>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fields(mut self, fields: &[&str]) -> Self {
        self.fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn sort(mut self, field: &str) -> Self {
        self.sort = Some(field.to_string());
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Interface for the primary (source of truth) store.
///
/// # Implementations
///
/// - `MongoDocumentStore`: MongoDB, one collection per tenant and table
/// - `MockDocumentStore`: in-memory store for testing
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Find documents of `table` for `tenant` matching `filter`.
    async fn find(
        &self,
        tenant: &str,
        table: &str,
        filter: &Filter,
        opts: &FindOptions,
    ) -> Result<Vec<Document>>;

    /// Count documents of `table` for `tenant` matching `filter`.
    async fn count(&self, tenant: &str, table: &str, filter: &Filter) -> Result<u64>;
}
