//! Mock DocumentStore implementation for testing.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::interfaces::document_store::{
    lookup, Document, DocumentStore, Filter, FindOptions, Result, StoreError,
};

/// Field holding the opaque document id.
pub const OID_FIELD: &str = "_id";

type TableKey = (String, String);

/// Mock document store keeping per-tenant tables in memory.
///
/// Documents get a hex opaque id in `_id` on insert unless they carry one.
#[derive(Default)]
pub struct MockDocumentStore {
    tables: RwLock<HashMap<TableKey, Vec<Document>>>,
    next_oid: AtomicU64,
    fail_on_find: RwLock<bool>,
    find_calls: AtomicU64,
}

impl MockDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_find(&self, fail: bool) {
        *self.fail_on_find.write().await = fail;
    }

    /// Number of `find`/`count` calls served so far.
    pub fn find_calls(&self) -> u64 {
        self.find_calls.load(AtomicOrdering::SeqCst)
    }

    /// Insert a document built from a JSON object, returning its opaque id.
    pub async fn insert(&self, tenant: &str, table: &str, doc: Value) -> String {
        let mut doc = match doc {
            Value::Object(map) => map,
            other => {
                let mut map = Document::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        let oid = match doc.get(OID_FIELD).and_then(Value::as_str) {
            Some(oid) => oid.to_string(),
            None => {
                let n = self.next_oid.fetch_add(1, AtomicOrdering::SeqCst) + 1;
                let oid = format!("{:024x}", n);
                doc.insert(OID_FIELD.to_string(), Value::String(oid.clone()));
                oid
            }
        };
        self.tables
            .write()
            .await
            .entry((tenant.to_string(), table.to_string()))
            .or_default()
            .push(doc);
        oid
    }

    /// Merge `fields` into the document with opaque id `oid`.
    pub async fn update(&self, tenant: &str, table: &str, oid: &str, fields: Value) -> bool {
        let mut tables = self.tables.write().await;
        let Some(docs) = tables.get_mut(&(tenant.to_string(), table.to_string())) else {
            return false;
        };
        let Some(doc) = docs
            .iter_mut()
            .find(|d| d.get(OID_FIELD).and_then(Value::as_str) == Some(oid))
        else {
            return false;
        };
        if let Value::Object(fields) = fields {
            for (k, v) in fields {
                doc.insert(k, v);
            }
        }
        true
    }

    /// Remove and return the document with opaque id `oid`.
    pub async fn remove(&self, tenant: &str, table: &str, oid: &str) -> Option<Document> {
        let mut tables = self.tables.write().await;
        let docs = tables.get_mut(&(tenant.to_string(), table.to_string()))?;
        let pos = docs
            .iter()
            .position(|d| d.get(OID_FIELD).and_then(Value::as_str) == Some(oid))?;
        Some(docs.remove(pos))
    }

    async fn check_fail(&self) -> Result<()> {
        self.find_calls.fetch_add(1, AtomicOrdering::SeqCst);
        if *self.fail_on_find.read().await {
            return Err(StoreError::Database("mock find failure".to_string()));
        }
        Ok(())
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    compare(a, b) == Some(Ordering::Equal) || a == b
}

/// Evaluate a filter against a document.
pub fn matches(doc: &Document, filter: &Filter) -> bool {
    match filter {
        Filter::All => true,
        Filter::Eq(field, value) => lookup(doc, field).is_some_and(|v| values_equal(v, value)),
        Filter::In(field, values) => {
            lookup(doc, field).is_some_and(|v| values.iter().any(|x| values_equal(v, x)))
        }
        Filter::Gt(field, value) => {
            lookup(doc, field).is_some_and(|v| compare(v, value) == Some(Ordering::Greater))
        }
        Filter::Oids(oids) => doc
            .get(OID_FIELD)
            .and_then(Value::as_str)
            .is_some_and(|oid| oids.iter().any(|o| o == oid)),
        Filter::And(filters) => filters.iter().all(|f| matches(doc, f)),
        Filter::Or(filters) => filters.iter().any(|f| matches(doc, f)),
    }
}

fn project(doc: &Document, fields: &[String]) -> Document {
    if fields.is_empty() {
        return doc.clone();
    }
    let mut out = Document::new();
    if let Some(oid) = doc.get(OID_FIELD) {
        out.insert(OID_FIELD.to_string(), oid.clone());
    }
    for field in fields {
        let top = field.split('.').next().unwrap_or(field);
        if let Some(v) = doc.get(top) {
            out.insert(top.to_string(), v.clone());
        }
    }
    out
}

#[async_trait]
impl DocumentStore for MockDocumentStore {
    async fn find(
        &self,
        tenant: &str,
        table: &str,
        filter: &Filter,
        opts: &FindOptions,
    ) -> Result<Vec<Document>> {
        self.check_fail().await?;
        let tables = self.tables.read().await;
        let mut docs: Vec<&Document> = tables
            .get(&(tenant.to_string(), table.to_string()))
            .map(|docs| docs.iter().filter(|d| matches(d, filter)).collect())
            .unwrap_or_default();

        if let Some(sort) = &opts.sort {
            docs.sort_by(|a, b| match (lookup(a, sort), lookup(b, sort)) {
                (Some(x), Some(y)) => compare(x, y).unwrap_or(Ordering::Equal),
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            });
        }

        let limit = opts
            .limit
            .and_then(|l| usize::try_from(l).ok())
            .unwrap_or(usize::MAX);

        Ok(docs
            .into_iter()
            .take(limit)
            .map(|d| project(d, &opts.fields))
            .collect())
    }

    async fn count(&self, tenant: &str, table: &str, filter: &Filter) -> Result<u64> {
        self.check_fail().await?;
        let tables = self.tables.read().await;
        Ok(tables
            .get(&(tenant.to_string(), table.to_string()))
            .map(|docs| docs.iter().filter(|d| matches(d, filter)).count() as u64)
            .unwrap_or(0))
    }
}
