//! Kube topology change handlers.
//!
//! Cluster, namespace and workload changes patch node details; pod inserts
//! and deletes recompute the owning workload's container count. Nodes under
//! a shared namespace are patched in the owner business and in the business
//! the namespace is shared with.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{EventHandler, ResourceKind};
use crate::interfaces::{ChangeEvent, Document, DocumentStore, Filter, FindOptions, OperationType};
use crate::topo::level::{container_counts, paged_find, parse_named, ID_CHUNK_SIZE};
use crate::topo::schema::{
    doc_i64, doc_str, workload_kind, FIELD_ASST_BIZ_ID, FIELD_BIZ_ID, FIELD_CLUSTER_ID, FIELD_ID,
    FIELD_NAME, FIELD_NAMESPACE_ID, FIELD_REF_ID, FIELD_REF_KIND, KIND_CLUSTER, KIND_NAMESPACE,
    TABLE_NS_SHARED_RELATION, TABLE_POD,
};
use crate::topo::{BizRef, Node, RefreshQueues, Result, TopoError, TopoType, TopologyManager};

/// Owners of the clusters that lend namespaces to other businesses.
#[derive(Clone)]
pub struct SharedNsRelations {
    store: Arc<dyn DocumentStore>,
}

impl SharedNsRelations {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Cluster owner of each lent namespace in `ns_ids`. Namespaces that are
    /// not lent are left out of the result.
    pub async fn asst_biz(&self, tenant: &str, ns_ids: &[i64]) -> Result<HashMap<i64, i64>> {
        let mut shared = HashMap::new();
        for chunk in ns_ids.chunks(ID_CHUNK_SIZE) {
            let docs = paged_find(
                self.store.as_ref(),
                tenant,
                TABLE_NS_SHARED_RELATION,
                FIELD_NAMESPACE_ID,
                &Filter::in_ids(FIELD_NAMESPACE_ID, chunk),
                &[FIELD_NAMESPACE_ID, FIELD_ASST_BIZ_ID],
            )
            .await?;
            for doc in &docs {
                shared.insert(
                    doc_i64(doc, FIELD_NAMESPACE_ID, TABLE_NS_SHARED_RELATION)?,
                    doc_i64(doc, FIELD_ASST_BIZ_ID, TABLE_NS_SHARED_RELATION)?,
                );
            }
        }
        Ok(shared)
    }
}

/// A parsed node with the namespace it sits in, if any.
struct Located {
    biz_id: i64,
    ns_id: Option<i64>,
    node: Node,
}

/// Pending node cache changes of one tenant, grouped by business and kind.
#[derive(Default)]
struct TenantChanges {
    upserts: HashMap<(i64, String), Vec<Node>>,
    deletes: HashMap<(i64, String), Vec<i64>>,
}

/// Handles cluster, namespace and workload changes.
pub struct KubeNodeHandler {
    kind: ResourceKind,
    manager: Arc<TopologyManager>,
    queues: Arc<RefreshQueues>,
    shared: SharedNsRelations,
}

impl KubeNodeHandler {
    pub fn new(
        kind: ResourceKind,
        manager: Arc<TopologyManager>,
        queues: Arc<RefreshQueues>,
        shared: SharedNsRelations,
    ) -> Self {
        Self {
            kind,
            manager,
            queues,
            shared,
        }
    }

    fn node_kind(&self, table: &str) -> Result<&'static str> {
        match self.kind {
            ResourceKind::Cluster => Ok(KIND_CLUSTER),
            ResourceKind::Namespace => Ok(KIND_NAMESPACE),
            ResourceKind::Workload => {
                workload_kind(table).ok_or_else(|| TopoError::UnknownTable(table.to_string()))
            }
            _ => Err(TopoError::UnknownTable(table.to_string())),
        }
    }

    fn parent_field(&self) -> Option<&'static str> {
        match self.kind {
            ResourceKind::Namespace => Some(FIELD_CLUSTER_ID),
            ResourceKind::Workload => Some(FIELD_NAMESPACE_ID),
            _ => None,
        }
    }

    /// Parse a node document as stored by its table.
    fn locate(&self, doc: &Document, kind: &str) -> Result<Located> {
        let biz_id = doc_i64(doc, FIELD_BIZ_ID, kind)?;
        let node = parse_named(doc, kind, self.parent_field(), biz_id)?;
        let ns_id = match self.kind {
            ResourceKind::Namespace => Some(node.id),
            ResourceKind::Workload => Some(node.parent_id),
            _ => None,
        };
        Ok(Located {
            biz_id,
            ns_id,
            node,
        })
    }

    fn fields(&self) -> Vec<&'static str> {
        let mut fields = vec![FIELD_BIZ_ID, FIELD_ID, FIELD_NAME];
        fields.extend(self.parent_field());
        fields
    }

    /// Current documents of the inserted or renamed nodes.
    async fn reload(&self, tenant: &str, table: &str, oids: Vec<String>) -> Result<Vec<Document>> {
        let opts = FindOptions::new().fields(&self.fields());
        Ok(self
            .manager
            .store()
            .find(tenant, table, &Filter::Oids(oids), &opts)
            .await?)
    }

    /// Group located nodes per business, duplicating those under a shared
    /// namespace into the business they are shared with.
    async fn fan_out(&self, tenant: &str, located: Vec<Located>) -> Result<Vec<(i64, Node)>> {
        let ns_ids: Vec<i64> = located
            .iter()
            .filter_map(|l| l.ns_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let shared = if ns_ids.is_empty() {
            HashMap::new()
        } else {
            self.shared.asst_biz(tenant, &ns_ids).await?
        };

        let mut out = Vec::with_capacity(located.len());
        for l in located {
            if let Some(asst) = l.ns_id.and_then(|ns| shared.get(&ns)) {
                out.push((*asst, l.node.clone()));
            }
            out.push((l.biz_id, l.node));
        }
        Ok(out)
    }

    async fn apply(&self, tenant: &str, changes: TenantChanges) -> Result<Vec<BizRef>> {
        let key = self.manager.keys().get(TopoType::Kube)?;
        let nodes = self.manager.node_cache();
        let mut affected = BTreeSet::new();

        for ((biz_id, kind), upserts) in &changes.upserts {
            nodes
                .add_node_info_cache(&key, tenant, *biz_id, kind, upserts)
                .await?;
            affected.insert(*biz_id);
        }
        for ((biz_id, kind), ids) in &changes.deletes {
            nodes
                .delete_node_info_cache(&key, tenant, *biz_id, kind, ids)
                .await?;
            nodes
                .delete_node_count_cache(&key, tenant, *biz_id, kind, ids)
                .await?;
            affected.insert(*biz_id);
        }

        Ok(affected
            .into_iter()
            .map(|biz_id| BizRef::new(tenant, biz_id))
            .collect())
    }
}

#[async_trait]
impl EventHandler for KubeNodeHandler {
    async fn handle(&self, events: &[ChangeEvent]) -> Result<()> {
        let mut reload: HashMap<(&str, &str), Vec<String>> = HashMap::new();
        let mut deleted: HashMap<&str, Vec<(&str, &Document)>> = HashMap::new();

        for event in events {
            match event.operation {
                OperationType::Insert | OperationType::Replace => {}
                OperationType::Update if event.updated(FIELD_NAME) => {}
                OperationType::Delete => {
                    match &event.document {
                        Some(doc) => deleted
                            .entry(event.tenant.as_str())
                            .or_default()
                            .push((event.table.as_str(), doc)),
                        None => debug!(table = %event.table, oid = %event.oid,
                            "Delete without archived document, skipping"),
                    }
                    continue;
                }
                _ => continue,
            }
            reload
                .entry((event.tenant.as_str(), event.table.as_str()))
                .or_default()
                .push(event.oid.clone());
        }

        let mut by_tenant: HashMap<String, TenantChanges> = HashMap::new();

        for ((tenant, table), oids) in reload {
            let kind = self.node_kind(table)?;
            let mut located = Vec::new();
            for doc in self.reload(tenant, table, oids).await? {
                match self.locate(&doc, kind) {
                    Ok(l) => located.push(l),
                    Err(e) => warn!(tenant, table, error = %e, "Skipping unparseable node"),
                }
            }
            let changes = by_tenant.entry(tenant.to_string()).or_default();
            for (biz_id, node) in self.fan_out(tenant, located).await? {
                changes
                    .upserts
                    .entry((biz_id, kind.to_string()))
                    .or_default()
                    .push(node);
            }
        }

        for (tenant, docs) in deleted {
            let mut located = Vec::new();
            for (table, doc) in docs {
                let kind = self.node_kind(table)?;
                let parsed = doc_i64(doc, FIELD_BIZ_ID, kind).and_then(|biz_id| {
                    let id = doc_i64(doc, FIELD_ID, kind)?;
                    let ns_id = match self.kind {
                        ResourceKind::Namespace => Some(id),
                        ResourceKind::Workload => Some(doc_i64(doc, FIELD_NAMESPACE_ID, kind)?),
                        _ => None,
                    };
                    Ok(Located {
                        biz_id,
                        ns_id,
                        node: Node::new(kind, id, "", 0),
                    })
                });
                match parsed {
                    Ok(l) => located.push(l),
                    Err(e) => warn!(tenant, table, error = %e, "Skipping unparseable deleted node"),
                }
            }
            let changes = by_tenant.entry(tenant.to_string()).or_default();
            for (biz_id, node) in self.fan_out(tenant, located).await? {
                changes
                    .deletes
                    .entry((biz_id, node.kind))
                    .or_default()
                    .push(node.id);
            }
        }

        for (tenant, changes) in by_tenant {
            let affected = self.apply(&tenant, changes).await?;
            debug!(tenant = %tenant, kind = %self.kind, businesses = affected.len(),
                "Patched kube nodes");
            self.queues.push(TopoType::Kube, affected).await;
        }
        Ok(())
    }
}

/// Recomputes workload container counts on pod inserts and deletes.
pub struct PodHandler {
    manager: Arc<TopologyManager>,
    queues: Arc<RefreshQueues>,
    shared: SharedNsRelations,
}

/// The parts of a pod document a count refresh needs.
struct PodRef {
    biz_id: i64,
    ns_id: i64,
    workload_kind: String,
    workload_id: i64,
}

impl PodRef {
    fn parse(doc: &Document) -> Result<Self> {
        let workload_kind = doc_str(doc, FIELD_REF_KIND);
        if workload_kind.is_empty() {
            return Err(TopoError::InvalidNode {
                kind: TABLE_POD.to_string(),
                id: doc_i64(doc, FIELD_ID, TABLE_POD).unwrap_or_default(),
                reason: format!("missing field {}", FIELD_REF_KIND),
            });
        }
        Ok(Self {
            biz_id: doc_i64(doc, FIELD_BIZ_ID, TABLE_POD)?,
            ns_id: doc_i64(doc, FIELD_NAMESPACE_ID, TABLE_POD)?,
            workload_kind,
            workload_id: doc_i64(doc, FIELD_REF_ID, TABLE_POD)?,
        })
    }
}

impl PodHandler {
    pub fn new(
        manager: Arc<TopologyManager>,
        queues: Arc<RefreshQueues>,
        shared: SharedNsRelations,
    ) -> Self {
        Self {
            manager,
            queues,
            shared,
        }
    }

    async fn refresh_tenant(&self, tenant: &str, pods: Vec<PodRef>) -> Result<Vec<BizRef>> {
        let ns_ids: Vec<i64> = pods
            .iter()
            .map(|p| p.ns_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let shared = self.shared.asst_biz(tenant, &ns_ids).await?;

        // workload kind -> workload id -> businesses showing it
        let mut workloads: HashMap<String, HashMap<i64, BTreeSet<i64>>> = HashMap::new();
        for pod in &pods {
            let bizs = workloads
                .entry(pod.workload_kind.clone())
                .or_default()
                .entry(pod.workload_id)
                .or_default();
            bizs.insert(pod.biz_id);
            if let Some(asst) = shared.get(&pod.ns_id) {
                bizs.insert(*asst);
            }
        }

        let key = self.manager.keys().get(TopoType::Kube)?;
        let mut affected = BTreeSet::new();
        for (kind, bizs_by_workload) in workloads {
            let ids: Vec<i64> = bizs_by_workload.keys().copied().collect();
            let counts =
                container_counts(self.manager.store().as_ref(), tenant, &kind, &ids).await?;

            let mut per_biz: HashMap<i64, HashMap<i64, i64>> = HashMap::new();
            for (workload_id, bizs) in &bizs_by_workload {
                let count = counts.get(workload_id).copied().unwrap_or_default();
                for biz_id in bizs {
                    per_biz.entry(*biz_id).or_default().insert(*workload_id, count);
                }
            }
            for (biz_id, counts) in per_biz {
                self.manager
                    .node_cache()
                    .add_node_count_cache(&key, tenant, biz_id, &kind, &counts)
                    .await?;
                affected.insert(biz_id);
            }
        }

        Ok(affected
            .into_iter()
            .map(|biz_id| BizRef::new(tenant, biz_id))
            .collect())
    }
}

#[async_trait]
impl EventHandler for PodHandler {
    async fn handle(&self, events: &[ChangeEvent]) -> Result<()> {
        let mut by_tenant: HashMap<&str, Vec<PodRef>> = HashMap::new();
        for event in events {
            if !matches!(event.operation, OperationType::Insert | OperationType::Delete) {
                continue;
            }
            let Some(doc) = &event.document else {
                debug!(oid = %event.oid, "Pod event without document, skipping");
                continue;
            };
            match PodRef::parse(doc) {
                Ok(pod) => by_tenant.entry(event.tenant.as_str()).or_default().push(pod),
                Err(e) => warn!(tenant = %event.tenant, oid = %event.oid, error = %e,
                    "Skipping unparseable pod"),
            }
        }

        for (tenant, pods) in by_tenant {
            let affected = self.refresh_tenant(tenant, pods).await?;
            debug!(tenant, businesses = affected.len(), "Refreshed container counts");
            self.queues.push(TopoType::Kube, affected).await;
        }
        Ok(())
    }
}
