//! Business change handler.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::EventHandler;
use crate::interfaces::{ChangeEvent, OperationType};
use crate::topo::schema::{doc_i64, FIELD_BIZ_ID, FIELD_BIZ_NAME, TABLE_BIZ};
use crate::topo::{BizRef, RefreshQueues, Result, TopologyManager};

/// Keeps the business root of every topology in step with the business.
///
/// A rename queues the business for every topology type. A delete removes
/// its blobs and any pending refresh.
pub struct BusinessHandler {
    manager: Arc<TopologyManager>,
    queues: Arc<RefreshQueues>,
}

impl BusinessHandler {
    pub fn new(manager: Arc<TopologyManager>, queues: Arc<RefreshQueues>) -> Self {
        Self { manager, queues }
    }
}

#[async_trait]
impl EventHandler for BusinessHandler {
    async fn handle(&self, events: &[ChangeEvent]) -> Result<()> {
        let mut renamed = Vec::new();

        for event in events {
            let deleted = match event.operation {
                OperationType::Update if event.updated(FIELD_BIZ_NAME) => false,
                OperationType::Replace => false,
                OperationType::Delete => true,
                _ => continue,
            };
            let Some(doc) = &event.document else {
                debug!(oid = %event.oid, deleted, "Business event without document, skipping");
                continue;
            };
            let biz = match doc_i64(doc, FIELD_BIZ_ID, TABLE_BIZ) {
                Ok(biz_id) => BizRef::new(event.tenant.as_str(), biz_id),
                Err(e) => {
                    warn!(tenant = %event.tenant, error = %e, "Skipping unparseable business");
                    continue;
                }
            };

            if !deleted {
                renamed.push(biz);
                continue;
            }
            self.manager.delete_biz_topo(&biz.tenant, biz.biz_id).await?;
            self.queues.remove_all(&biz).await;
            renamed.retain(|r| r != &biz);
            info!(biz = %biz, "Business deleted, dropped its topologies");
        }

        if !renamed.is_empty() {
            debug!(businesses = renamed.len(), "Businesses renamed");
            self.queues.push_all(&renamed).await;
        }
        Ok(())
    }
}
