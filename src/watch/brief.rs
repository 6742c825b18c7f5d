//! Brief topology change handlers for sets and modules.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{EventHandler, ResourceKind};
use crate::interfaces::{ChangeEvent, Document, Filter, FindOptions, OperationType};
use crate::topo::level::{parse_module, parse_set};
use crate::topo::schema::{
    doc_i64, FIELD_BIZ_ID, FIELD_DEFAULT, FIELD_MODULE_ID, FIELD_MODULE_NAME, FIELD_SET_ID,
    FIELD_SET_NAME, KIND_MODULE, KIND_SET,
};
use crate::topo::{BizRef, Node, RefreshQueues, Result, TopoError, TopoType, TopologyManager};

/// Handles set or module changes.
///
/// Inserts and renames re-read the document and upsert the node; deletes
/// drop it. Every touched business is queued for a brief refresh.
pub struct BriefNodeHandler {
    kind: ResourceKind,
    manager: Arc<TopologyManager>,
    queues: Arc<RefreshQueues>,
}

impl BriefNodeHandler {
    pub fn new(
        kind: ResourceKind,
        manager: Arc<TopologyManager>,
        queues: Arc<RefreshQueues>,
    ) -> Result<Self> {
        match kind {
            ResourceKind::Set | ResourceKind::Module => Ok(Self {
                kind,
                manager,
                queues,
            }),
            other => Err(TopoError::UnknownTable(other.to_string())),
        }
    }

    fn node_kind(&self) -> &'static str {
        match self.kind {
            ResourceKind::Module => KIND_MODULE,
            _ => KIND_SET,
        }
    }

    fn id_field(&self) -> &'static str {
        match self.kind {
            ResourceKind::Module => FIELD_MODULE_ID,
            _ => FIELD_SET_ID,
        }
    }

    fn name_field(&self) -> &'static str {
        match self.kind {
            ResourceKind::Module => FIELD_MODULE_NAME,
            _ => FIELD_SET_NAME,
        }
    }

    fn parse(&self, doc: &Document) -> Result<(i64, Node)> {
        let biz_id = doc_i64(doc, FIELD_BIZ_ID, self.node_kind())?;
        let node = match self.kind {
            ResourceKind::Module => parse_module(doc)?,
            _ => parse_set(doc, biz_id)?,
        };
        Ok((biz_id, node))
    }

    /// Whether an event can change what the node cache holds.
    fn relevant(&self, event: &ChangeEvent) -> bool {
        match event.operation {
            OperationType::Insert | OperationType::Replace | OperationType::Delete => true,
            OperationType::Update => {
                event.updated(self.name_field()) || event.updated(FIELD_DEFAULT)
            }
            OperationType::Other => false,
        }
    }
}

#[async_trait]
impl EventHandler for BriefNodeHandler {
    async fn handle(&self, events: &[ChangeEvent]) -> Result<()> {
        let key = self.manager.keys().get(TopoType::Brief)?;
        let kind = self.node_kind();

        let mut reload: HashMap<&str, Vec<String>> = HashMap::new();
        let mut deletes: HashMap<(&str, i64), Vec<i64>> = HashMap::new();
        let mut table = None;

        for event in events.iter().filter(|e| self.relevant(e)) {
            table.get_or_insert(event.table.as_str());
            if event.operation != OperationType::Delete {
                reload
                    .entry(event.tenant.as_str())
                    .or_default()
                    .push(event.oid.clone());
                continue;
            }
            let Some(doc) = &event.document else {
                debug!(oid = %event.oid, kind, "Delete without archived document, skipping");
                continue;
            };
            let parsed = doc_i64(doc, FIELD_BIZ_ID, kind)
                .and_then(|biz_id| Ok((biz_id, doc_i64(doc, self.id_field(), kind)?)));
            match parsed {
                Ok((biz_id, id)) => deletes
                    .entry((event.tenant.as_str(), biz_id))
                    .or_default()
                    .push(id),
                Err(e) => warn!(tenant = %event.tenant, error = %e,
                    "Skipping unparseable deleted node"),
            }
        }

        let mut affected = BTreeSet::new();
        if let Some(table) = table {
            let fields = [
                FIELD_BIZ_ID,
                FIELD_SET_ID,
                FIELD_MODULE_ID,
                self.name_field(),
                FIELD_DEFAULT,
            ];
            for (tenant, oids) in reload {
                let docs = self
                    .manager
                    .store()
                    .find(tenant, table, &Filter::Oids(oids), &FindOptions::new().fields(&fields))
                    .await?;

                let mut upserts: HashMap<i64, Vec<Node>> = HashMap::new();
                for doc in &docs {
                    match self.parse(doc) {
                        Ok((biz_id, node)) => upserts.entry(biz_id).or_default().push(node),
                        Err(e) => warn!(tenant, error = %e, "Skipping unparseable node"),
                    }
                }
                for (biz_id, nodes) in upserts {
                    self.manager
                        .node_cache()
                        .add_node_info_cache(&key, tenant, biz_id, kind, &nodes)
                        .await?;
                    affected.insert(BizRef::new(tenant, biz_id));
                }
            }
        }

        for ((tenant, biz_id), ids) in deletes {
            self.manager
                .node_cache()
                .delete_node_info_cache(&key, tenant, biz_id, kind, &ids)
                .await?;
            affected.insert(BizRef::new(tenant, biz_id));
        }

        if !affected.is_empty() {
            debug!(kind, businesses = affected.len(), "Patched brief nodes");
            self.queues.push(TopoType::Brief, affected).await;
        }
        Ok(())
    }
}
