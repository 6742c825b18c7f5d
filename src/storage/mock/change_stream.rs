//! Mock ChangeStream implementation for testing.
//!
//! Events are pushed by the test with `emit` and delivered to every open
//! subscription of the event's table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{mpsc, RwLock};

use crate::interfaces::change_stream::{
    ChangeEvent, ChangeStream, EventCursor, OperationType, Result, StreamError, WatchToken,
};
use crate::interfaces::document_store::Document;

/// Mock change stream backed by unbounded channels.
#[derive(Default)]
pub struct MockChangeStream {
    subscribers: RwLock<HashMap<String, Vec<mpsc::UnboundedSender<ChangeEvent>>>>,
    archive: RwLock<HashMap<(String, String, String), Document>>,
    subscriptions: RwLock<Vec<(String, WatchToken)>>,
    reject_tokens: RwLock<bool>,
    next_token: AtomicU64,
}

impl MockChangeStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subscriptions that resume from a token fail with `TokenLost`.
    pub async fn set_reject_tokens(&self, reject: bool) {
        *self.reject_tokens.write().await = reject;
    }

    /// Positions every subscription was opened from, in order.
    pub async fn subscriptions(&self) -> Vec<(String, WatchToken)> {
        self.subscriptions.read().await.clone()
    }

    /// Number of open subscriptions for a table.
    pub async fn subscriber_count(&self, table: &str) -> usize {
        self.subscribers
            .read()
            .await
            .get(table)
            .map(|subs| subs.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }

    /// Archive a deleted document so delete events can be resolved.
    pub async fn archive(&self, tenant: &str, table: &str, oid: &str, doc: Document) {
        self.archive
            .write()
            .await
            .insert((tenant.to_string(), table.to_string(), oid.to_string()), doc);
    }

    /// Build an event with a fresh resume token.
    pub fn event(
        &self,
        tenant: &str,
        table: &str,
        oid: &str,
        operation: OperationType,
        updated_fields: &[&str],
        document: Option<Document>,
    ) -> ChangeEvent {
        let n = self.next_token.fetch_add(1, Ordering::SeqCst) + 1;
        ChangeEvent {
            tenant: tenant.to_string(),
            table: table.to_string(),
            oid: oid.to_string(),
            operation,
            updated_fields: updated_fields.iter().map(|f| f.to_string()).collect(),
            document,
            token: format!("token-{}", n),
            cluster_time: Utc::now(),
        }
    }

    /// Deliver events to every subscriber of their table.
    pub async fn emit(&self, events: Vec<ChangeEvent>) {
        let mut subscribers = self.subscribers.write().await;
        for event in events {
            if let Some(subs) = subscribers.get_mut(&event.table) {
                subs.retain(|s| s.send(event.clone()).is_ok());
            }
        }
    }
}

struct MockCursor {
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
}

#[async_trait]
impl EventCursor for MockCursor {
    async fn next_batch(&mut self, max: usize) -> Result<Vec<ChangeEvent>> {
        let first = self
            .rx
            .recv()
            .await
            .ok_or_else(|| StreamError::Stream("mock stream closed".to_string()))?;
        let mut batch = vec![first];
        while batch.len() < max {
            match self.rx.try_recv() {
                Ok(event) => batch.push(event),
                Err(_) => break,
            }
        }
        Ok(batch)
    }
}

#[async_trait]
impl ChangeStream for MockChangeStream {
    async fn subscribe(&self, table: &str, from: &WatchToken) -> Result<Box<dyn EventCursor>> {
        self.subscriptions
            .write()
            .await
            .push((table.to_string(), from.clone()));

        if from.token.is_some() && *self.reject_tokens.read().await {
            return Err(StreamError::TokenLost(format!(
                "mock rejected token {:?}",
                from.token
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .write()
            .await
            .entry(table.to_string())
            .or_default()
            .push(tx);
        Ok(Box::new(MockCursor { rx }))
    }

    async fn deleted_documents(
        &self,
        tenant: &str,
        table: &str,
        oids: &[String],
    ) -> Result<HashMap<String, Document>> {
        let archive = self.archive.read().await;
        Ok(oids
            .iter()
            .filter_map(|oid| {
                archive
                    .get(&(tenant.to_string(), table.to_string(), oid.clone()))
                    .map(|doc| (oid.clone(), doc.clone()))
            })
            .collect())
    }
}
