//! Per-table change stream consumption.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use backon::Retryable;
use tracing::{debug, error, info, warn};

use super::{EventHandler, ResourceKind};
use crate::config::WatchConfig;
use crate::interfaces::{
    ChangeEvent, ChangeStream, Document, EventCursor, OperationType, StreamError, TokenStore,
    WatchToken,
};
use crate::topo::TopoError;
use crate::utils::retry::{batch_backoff, is_retryable};
use crate::utils::task::{StopSignal, TaskHandle};

/// Name under which a table's watch position is stored.
pub fn token_name(table: &str) -> String {
    format!("biz_topo:{}", table)
}

/// Runs one consume loop per table of every registered resource kind.
pub struct Watcher {
    stream: Arc<dyn ChangeStream>,
    tokens: Arc<dyn TokenStore>,
    handlers: HashMap<ResourceKind, Arc<dyn EventHandler>>,
    config: WatchConfig,
}

impl Watcher {
    pub fn new(
        stream: Arc<dyn ChangeStream>,
        tokens: Arc<dyn TokenStore>,
        config: WatchConfig,
    ) -> Self {
        Self {
            stream,
            tokens,
            handlers: HashMap::new(),
            config,
        }
    }

    /// Register the handler of a resource kind, replacing any previous one.
    pub fn register(&mut self, kind: ResourceKind, handler: Arc<dyn EventHandler>) {
        self.handlers.insert(kind, handler);
    }

    /// Spawn the consume loops onto `tasks`.
    pub fn start(&self, tasks: &mut TaskHandle) {
        for (kind, handler) in &self.handlers {
            for table in kind.tables() {
                let watch = TableWatch {
                    table: table.to_string(),
                    kind: *kind,
                    handler: handler.clone(),
                    stream: self.stream.clone(),
                    tokens: self.tokens.clone(),
                    config: self.config.clone(),
                };
                tasks.push(tokio::spawn(watch.run(tasks.signal())));
            }
        }
    }
}

/// Consume loop state of one table.
pub(crate) struct TableWatch {
    pub(crate) table: String,
    pub(crate) kind: ResourceKind,
    pub(crate) handler: Arc<dyn EventHandler>,
    pub(crate) stream: Arc<dyn ChangeStream>,
    pub(crate) tokens: Arc<dyn TokenStore>,
    pub(crate) config: WatchConfig,
}

fn needs_archive(event: &ChangeEvent) -> bool {
    event.operation == OperationType::Delete && event.document.is_none()
}

enum Exit {
    Stopped,
    Resubscribe,
}

impl TableWatch {
    fn token_name(&self) -> String {
        token_name(&self.table)
    }

    /// Open a cursor at the stored position.
    ///
    /// A stored position the stream no longer accepts is replaced with "now"
    /// and the subscription retried once from there.
    pub(crate) async fn open(&self) -> std::result::Result<Box<dyn EventCursor>, StreamError> {
        let name = self.token_name();
        let from = self.tokens.get(&name).await?.unwrap_or_default();

        match self.stream.subscribe(&self.table, &from).await {
            Ok(cursor) => {
                info!(table = %self.table, kind = %self.kind, resumed = from.token.is_some(),
                    "Watching table");
                Ok(cursor)
            }
            Err(StreamError::TokenLost(reason)) => {
                warn!(table = %self.table, reason = %reason,
                    "Watch position lost, restarting from now");
                let reset = self.reset_token().await?;
                self.stream.subscribe(&self.table, &reset).await
            }
            Err(e) => Err(e),
        }
    }

    async fn reset_token(&self) -> std::result::Result<WatchToken, StreamError> {
        let reset = WatchToken::reset_now();
        self.tokens.put(&self.token_name(), &reset).await?;
        Ok(reset)
    }

    /// Handle one batch and advance the stored position past it.
    ///
    /// Only transient failures are retried. A batch that still fails is
    /// skipped; the periodic sweep repairs whatever it would have changed.
    pub(crate) async fn process(&self, mut events: Vec<ChangeEvent>) {
        let Some(last) = events.last().map(WatchToken::after) else {
            return;
        };

        let archived = (|| async { self.archived(&events).await })
            .retry(batch_backoff(&self.config))
            .notify(|e: &StreamError, delay: Duration| {
                warn!(table = %self.table, error = %e, delay = ?delay,
                    "Reading deleted documents failed, retrying");
            })
            .await;
        match archived {
            Ok(mut docs) => {
                for event in events.iter_mut().filter(|e| needs_archive(e)) {
                    event.document = docs.remove(&(event.tenant.clone(), event.oid.clone()));
                    if event.document.is_none() {
                        warn!(table = %self.table, tenant = %event.tenant, oid = %event.oid,
                            "Deleted document not archived");
                    }
                }
            }
            Err(e) => {
                error!(table = %self.table, error = %e, "Failed to read deleted documents");
            }
        }

        let result = (|| async { self.handler.handle(&events).await })
            .retry(batch_backoff(&self.config))
            .when(is_retryable)
            .notify(|e: &TopoError, delay: Duration| {
                warn!(table = %self.table, error = %e, delay = ?delay,
                    "Event batch failed, retrying");
            })
            .await;

        match result {
            Ok(()) => {
                debug!(table = %self.table, events = events.len(), "Handled event batch");
            }
            Err(e) => {
                error!(table = %self.table, events = events.len(), error = %e,
                    "Event batch failed, skipping");
            }
        }

        if let Err(e) = self.tokens.put(&self.token_name(), &last).await {
            warn!(table = %self.table, error = %e, "Failed to store watch position");
        }
    }

    /// Archived documents of the batch's delete events, keyed by tenant and
    /// opaque id.
    async fn archived(
        &self,
        events: &[ChangeEvent],
    ) -> std::result::Result<HashMap<(String, String), Document>, StreamError> {
        let mut oids_by_tenant: HashMap<&str, Vec<String>> = HashMap::new();
        for event in events.iter().filter(|e| needs_archive(e)) {
            oids_by_tenant
                .entry(event.tenant.as_str())
                .or_default()
                .push(event.oid.clone());
        }

        let mut archived = HashMap::new();
        for (tenant, oids) in oids_by_tenant {
            let docs = self
                .stream
                .deleted_documents(tenant, &self.table, &oids)
                .await?;
            archived.extend(
                docs.into_iter()
                    .map(|(oid, doc)| ((tenant.to_string(), oid), doc)),
            );
        }
        Ok(archived)
    }

    async fn consume(&self, cursor: &mut dyn EventCursor, stop: &mut StopSignal) -> Exit {
        loop {
            let batch = tokio::select! {
                batch = cursor.next_batch(self.config.batch_size) => batch,
                _ = stop.changed() => return Exit::Stopped,
            };

            match batch {
                Ok(events) if events.is_empty() => continue,
                Ok(events) => {
                    tokio::select! {
                        _ = self.process(events) => {}
                        _ = stop.changed() => return Exit::Stopped,
                    }
                }
                Err(StreamError::TokenLost(reason)) => {
                    warn!(table = %self.table, reason = %reason,
                        "Watch position lost, restarting from now");
                    if let Err(e) = self.reset_token().await {
                        error!(table = %self.table, error = %e, "Failed to reset watch position");
                    }
                    return Exit::Resubscribe;
                }
                Err(e) => {
                    error!(table = %self.table, error = %e, "Change stream failed");
                    return Exit::Resubscribe;
                }
            }
        }
    }

    pub(crate) async fn run(self, mut stop: StopSignal) {
        loop {
            let opened = tokio::select! {
                opened = self.open() => opened,
                _ = stop.changed() => break,
            };

            let exit = match opened {
                Ok(mut cursor) => self.consume(cursor.as_mut(), &mut stop).await,
                Err(e) => {
                    error!(table = %self.table, error = %e, "Failed to open change stream");
                    Exit::Resubscribe
                }
            };

            match exit {
                Exit::Stopped => break,
                Exit::Resubscribe => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.retry_interval()) => {}
                        _ = stop.changed() => break,
                    }
                }
            }
        }
        info!(table = %self.table, "Watch stopped");
    }
}
