//! Kube topology levels: cluster → namespace → workload.
//!
//! A shared cluster lends namespaces to other businesses. A namespace's
//! `bk_biz_id` is the business using it, and the share relation's
//! `bk_asst_biz_id` is the cluster owner. The owner's tree holds every
//! namespace of its clusters; a borrowing business sees the lent cluster
//! with only its own namespaces beneath.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{combine, id_conds, paged_find, Level, LevelBase, ID_CHUNK_SIZE};
use crate::interfaces::{Document, DocumentStore, Filter};
use crate::topo::error::Result;
use crate::topo::key::Key;
use crate::topo::node::NodeCache;
use crate::topo::schema::{
    doc_i64, doc_str, FIELD_BIZ_ID, FIELD_CLUSTER_ID, FIELD_ID, FIELD_NAME,
    FIELD_NAMESPACE_ID, FIELD_POD_ID, FIELD_REF_ID, FIELD_REF_KIND, KIND_CLUSTER, KIND_NAMESPACE,
    TABLE_CLUSTER, TABLE_CONTAINER, TABLE_NAMESPACE, TABLE_NS_SHARED_RELATION, TABLE_POD,
    WORKLOAD_TABLES,
};
use crate::topo::types::{Node, Scope};

/// Build the kube level chain.
pub fn kube_levels(
    store: Arc<dyn DocumentStore>,
    nodes: NodeCache,
    key: Arc<Key>,
) -> Arc<dyn Level> {
    let workload: Arc<dyn Level> = Arc::new(WorkloadLevel::new(LevelBase::new(
        store.clone(),
        nodes.clone(),
        key.clone(),
        None,
    )));
    let namespace: Arc<dyn Level> = Arc::new(NamespaceLevel::new(LevelBase::new(
        store.clone(),
        nodes.clone(),
        key.clone(),
        Some(workload),
    )));
    Arc::new(ClusterLevel::new(LevelBase::new(
        store,
        nodes,
        key,
        Some(namespace),
    )))
}

/// Clusters owned by the business or lending it namespaces.
pub struct ClusterLevel {
    base: LevelBase,
}

impl ClusterLevel {
    pub fn new(base: LevelBase) -> Self {
        Self { base }
    }

    /// Clusters of other businesses in which `biz_id` holds shared
    /// namespaces.
    async fn borrowed_clusters(&self, scope: &Scope, biz_id: i64) -> Result<Vec<i64>> {
        let docs = self
            .base
            .find_all(
                &scope.tenant,
                TABLE_NS_SHARED_RELATION,
                FIELD_NAMESPACE_ID,
                &Filter::eq(FIELD_BIZ_ID, biz_id),
                &[FIELD_NAMESPACE_ID, FIELD_CLUSTER_ID],
            )
            .await?;

        let mut clusters = Vec::new();
        for doc in &docs {
            let cluster = doc_i64(doc, FIELD_CLUSTER_ID, TABLE_NS_SHARED_RELATION)?;
            if !clusters.contains(&cluster) {
                clusters.push(cluster);
            }
        }
        Ok(clusters)
    }
}

/// "Owned by `biz_id`, or one of `borrowed`".
fn owned_or_borrowed(biz_id: i64, borrowed: &[i64]) -> Filter {
    let owned = Filter::eq(FIELD_BIZ_ID, biz_id);
    if borrowed.is_empty() {
        owned
    } else {
        Filter::Or(vec![owned, Filter::in_ids(FIELD_ID, borrowed)])
    }
}

/// Namespace scopes under the business's clusters.
///
/// Every namespace of an owned cluster belongs to the tree, including those
/// shared out to other businesses. Under a borrowed cluster only the
/// business's own namespaces do.
fn namespace_conds(biz_id: i64, clusters: &[Node], borrowed: &[i64]) -> Vec<Filter> {
    let (lent, owned): (Vec<i64>, Vec<i64>) = clusters
        .iter()
        .map(|n| n.id)
        .partition(|id| borrowed.contains(id));

    let mut conds = id_conds(FIELD_CLUSTER_ID, &owned);
    conds.extend(
        id_conds(FIELD_CLUSTER_ID, &lent)
            .into_iter()
            .map(|by_cluster| by_cluster.and(Filter::eq(FIELD_BIZ_ID, biz_id))),
    );
    conds
}

pub(crate) fn parse_named(
    doc: &Document,
    kind: &str,
    parent_field: Option<&str>,
    parent_default: i64,
) -> Result<Node> {
    let id = doc_i64(doc, FIELD_ID, kind)?;
    let parent_id = match parent_field {
        Some(field) => doc_i64(doc, field, kind)?,
        None => parent_default,
    };
    Ok(Node::new(kind, id, doc_str(doc, FIELD_NAME), parent_id))
}

#[async_trait]
impl Level for ClusterLevel {
    async fn get_nodes_by_db(
        &self,
        scope: &Scope,
        biz_id: i64,
        _conds: &[Filter],
    ) -> Result<Vec<Node>> {
        let borrowed = self.borrowed_clusters(scope, biz_id).await?;

        let clusters = self
            .base
            .find_nodes(
                scope,
                TABLE_CLUSTER,
                FIELD_ID,
                &[owned_or_borrowed(biz_id, &borrowed)],
                &[FIELD_ID, FIELD_NAME],
                |doc| parse_named(doc, KIND_CLUSTER, None, biz_id),
            )
            .await?;
        self.base.reconcile(scope, biz_id, KIND_CLUSTER, &clusters).await;

        let ns_conds = namespace_conds(biz_id, &clusters, &borrowed);
        debug!(rid = %scope.rid, biz_id, clusters = clusters.len(),
            borrowed = borrowed.len(), "Fetched kube clusters");

        let namespaces = self.base.next_by_db(scope, biz_id, &ns_conds).await?;
        Ok(combine(clusters, namespaces))
    }

    async fn get_nodes_by_cache(&self, scope: &Scope, biz_id: i64) -> Result<Vec<Node>> {
        let clusters = self.base.cached_nodes(scope, biz_id, KIND_CLUSTER).await?;
        let namespaces = self.base.next_by_cache(scope, biz_id).await?;
        Ok(combine(clusters, namespaces))
    }
}

/// Namespaces, scoped by the cluster level.
pub struct NamespaceLevel {
    base: LevelBase,
}

impl NamespaceLevel {
    pub fn new(base: LevelBase) -> Self {
        Self { base }
    }
}

#[async_trait]
impl Level for NamespaceLevel {
    async fn get_nodes_by_db(
        &self,
        scope: &Scope,
        biz_id: i64,
        conds: &[Filter],
    ) -> Result<Vec<Node>> {
        let namespaces = self
            .base
            .find_nodes(
                scope,
                TABLE_NAMESPACE,
                FIELD_ID,
                conds,
                &[FIELD_ID, FIELD_NAME, FIELD_CLUSTER_ID],
                |doc| parse_named(doc, KIND_NAMESPACE, Some(FIELD_CLUSTER_ID), 0),
            )
            .await?;
        self.base.reconcile(scope, biz_id, KIND_NAMESPACE, &namespaces).await;

        let ns_ids: Vec<i64> = namespaces.iter().map(|n| n.id).collect();
        let workloads = self
            .base
            .next_by_db(scope, biz_id, &id_conds(FIELD_NAMESPACE_ID, &ns_ids))
            .await?;
        Ok(combine(namespaces, workloads))
    }

    async fn get_nodes_by_cache(&self, scope: &Scope, biz_id: i64) -> Result<Vec<Node>> {
        let namespaces = self.base.cached_nodes(scope, biz_id, KIND_NAMESPACE).await?;
        let workloads = self.base.next_by_cache(scope, biz_id).await?;
        Ok(combine(namespaces, workloads))
    }
}

/// Workloads of every kind, with container counts. Leaf level.
pub struct WorkloadLevel {
    base: LevelBase,
}

impl WorkloadLevel {
    pub fn new(base: LevelBase) -> Self {
        Self { base }
    }
}

#[async_trait]
impl Level for WorkloadLevel {
    async fn get_nodes_by_db(
        &self,
        scope: &Scope,
        biz_id: i64,
        conds: &[Filter],
    ) -> Result<Vec<Node>> {
        let mut all = Vec::new();

        for (kind, table) in WORKLOAD_TABLES {
            let mut workloads = self
                .base
                .find_nodes(
                    scope,
                    table,
                    FIELD_ID,
                    conds,
                    &[FIELD_ID, FIELD_NAME, FIELD_NAMESPACE_ID],
                    |doc| parse_named(doc, kind, Some(FIELD_NAMESPACE_ID), 0),
                )
                .await?;

            let ids: Vec<i64> = workloads.iter().map(|n| n.id).collect();
            let counts =
                container_counts(self.base.store.as_ref(), &scope.tenant, kind, &ids).await?;
            for workload in workloads.iter_mut() {
                workload.count = Some(counts.get(&workload.id).copied().unwrap_or_default());
            }

            self.base.reconcile(scope, biz_id, kind, &workloads).await;
            self.base.store_counts(scope, biz_id, kind, &counts).await;
            all.extend(workloads);
        }

        Ok(all)
    }

    async fn get_nodes_by_cache(&self, scope: &Scope, biz_id: i64) -> Result<Vec<Node>> {
        let mut all = Vec::new();

        for (kind, _) in WORKLOAD_TABLES {
            let mut workloads = self.base.cached_nodes(scope, biz_id, kind).await?;
            let ids: Vec<i64> = workloads.iter().map(|n| n.id).collect();
            let counts = self
                .base
                .nodes
                .get_node_count_cache(&self.base.key, &scope.tenant, biz_id, kind, &ids)
                .await?;
            for workload in workloads.iter_mut() {
                workload.count = Some(counts.get(&workload.id).copied().unwrap_or_default());
            }
            all.extend(workloads);
        }

        Ok(all)
    }
}

/// Container count of each workload of `kind`, joined through its pods.
///
/// Every id in `workload_ids` is present in the result; workloads without
/// pods count zero.
pub async fn container_counts(
    store: &dyn DocumentStore,
    tenant: &str,
    kind: &str,
    workload_ids: &[i64],
) -> Result<HashMap<i64, i64>> {
    let mut counts: HashMap<i64, i64> = workload_ids.iter().map(|id| (*id, 0)).collect();
    if workload_ids.is_empty() {
        return Ok(counts);
    }

    let mut pods_by_workload: HashMap<i64, Vec<i64>> = HashMap::new();
    for ids in workload_ids.chunks(ID_CHUNK_SIZE) {
        let cond = Filter::eq(FIELD_REF_KIND, Value::from(kind))
            .and(Filter::in_ids(FIELD_REF_ID, ids));
        let pods = paged_find(store, tenant, TABLE_POD, FIELD_ID, &cond, &[FIELD_ID, FIELD_REF_ID])
            .await?;
        for pod in &pods {
            let pod_id = doc_i64(pod, FIELD_ID, TABLE_POD)?;
            let workload_id = doc_i64(pod, FIELD_REF_ID, TABLE_POD)?;
            pods_by_workload.entry(workload_id).or_default().push(pod_id);
        }
    }

    for (workload_id, pod_ids) in pods_by_workload {
        let mut total = 0;
        for chunk in pod_ids.chunks(ID_CHUNK_SIZE) {
            total += store
                .count(tenant, TABLE_CONTAINER, &Filter::in_ids(FIELD_POD_ID, chunk))
                .await? as i64;
        }
        counts.insert(workload_id, total);
    }

    Ok(counts)
}
