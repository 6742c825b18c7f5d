//! Topology levels.
//!
//! A level is one layer of a topology (clusters, namespaces, workloads, ...).
//! Levels form a chain: each fetches its own nodes, asks the next level for
//! the layer below, and attaches those children by parent id.
//!
//! Two fetch paths exist:
//! - DB: read the primary store, reconcile the node cache with what was read
//! - Cache: read only the node cache

mod brief;
mod kube;

#[cfg(test)]
mod tests;

pub use brief::{brief_levels, ModuleLevel, SetLevel};
pub use kube::{container_counts, kube_levels, ClusterLevel, NamespaceLevel, WorkloadLevel};
pub(crate) use brief::{parse_module, parse_set};
pub(crate) use kube::parse_named;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::error::Result;
use super::key::Key;
use super::node::NodeCache;
use super::schema::doc_i64;
use super::types::{Node, Scope};
use crate::interfaces::{Document, DocumentStore, Filter, FindOptions};

/// Documents read per page when walking a table.
pub const PAGE_SIZE: i64 = 100;

/// Ids per `In` condition handed to a child level.
pub const ID_CHUNK_SIZE: usize = 500;

/// One layer of a topology.
#[async_trait]
pub trait Level: Send + Sync {
    /// Nodes of this layer (with their subtrees) from the primary store.
    ///
    /// `conds` scope the query; each condition is queried and the results
    /// accumulated. Levels that scope themselves ignore them. A level scoped
    /// by its parent with no conditions has no nodes.
    async fn get_nodes_by_db(&self, scope: &Scope, biz_id: i64, conds: &[Filter])
        -> Result<Vec<Node>>;

    /// Nodes of this layer (with their subtrees) from the node cache only.
    async fn get_nodes_by_cache(&self, scope: &Scope, biz_id: i64) -> Result<Vec<Node>>;
}

/// State shared by every concrete level.
#[derive(Clone)]
pub struct LevelBase {
    pub(crate) store: Arc<dyn DocumentStore>,
    pub(crate) nodes: NodeCache,
    pub(crate) key: Arc<Key>,
    pub(crate) next: Option<Arc<dyn Level>>,
}

impl LevelBase {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        nodes: NodeCache,
        key: Arc<Key>,
        next: Option<Arc<dyn Level>>,
    ) -> Self {
        Self {
            store,
            nodes,
            key,
            next,
        }
    }

    /// Every document matching `cond`, walked in pages ordered by `id_field`.
    ///
    /// The cursor filters on `id_field > last`, so concurrent inserts never
    /// make the walk skip or repeat documents.
    pub async fn find_all(
        &self,
        tenant: &str,
        table: &str,
        id_field: &str,
        cond: &Filter,
        fields: &[&str],
    ) -> Result<Vec<Document>> {
        paged_find(self.store.as_ref(), tenant, table, id_field, cond, fields).await
    }

    /// Parsed nodes of every condition in `conds`.
    pub async fn find_nodes<F>(
        &self,
        scope: &Scope,
        table: &str,
        id_field: &str,
        conds: &[Filter],
        fields: &[&str],
        parse: F,
    ) -> Result<Vec<Node>>
    where
        F: Fn(&Document) -> Result<Node> + Send + Sync,
    {
        let mut nodes = Vec::new();
        for cond in conds {
            let docs = self
                .find_all(&scope.tenant, table, id_field, cond, fields)
                .await?;
            for doc in &docs {
                nodes.push(parse(doc)?);
            }
        }
        Ok(nodes)
    }

    /// Reconcile one kind's node cache with freshly read nodes.
    ///
    /// Failures are logged only; the read result stays valid without cache.
    pub async fn reconcile(&self, scope: &Scope, biz_id: i64, kind: &str, nodes: &[Node]) {
        if let Err(e) = self
            .nodes
            .cross_compare_node_info_cache(&self.key, &scope.tenant, biz_id, kind, nodes)
            .await
        {
            warn!(rid = %scope.rid, tenant = %scope.tenant, biz_id, kind, error = %e,
                "Failed to reconcile node cache");
        }
    }

    /// Store rollup counts, logging failures.
    pub async fn store_counts(
        &self,
        scope: &Scope,
        biz_id: i64,
        kind: &str,
        counts: &HashMap<i64, i64>,
    ) {
        if let Err(e) = self
            .nodes
            .add_node_count_cache(&self.key, &scope.tenant, biz_id, kind, counts)
            .await
        {
            warn!(rid = %scope.rid, tenant = %scope.tenant, biz_id, kind, error = %e,
                "Failed to cache node counts");
        }
    }

    /// Children from the next level's DB path, or none at a leaf.
    pub async fn next_by_db(
        &self,
        scope: &Scope,
        biz_id: i64,
        conds: &[Filter],
    ) -> Result<Vec<Node>> {
        match &self.next {
            Some(next) => next.get_nodes_by_db(scope, biz_id, conds).await,
            None => Ok(Vec::new()),
        }
    }

    /// Children from the next level's cache path, or none at a leaf.
    pub async fn next_by_cache(&self, scope: &Scope, biz_id: i64) -> Result<Vec<Node>> {
        match &self.next {
            Some(next) => next.get_nodes_by_cache(scope, biz_id).await,
            None => Ok(Vec::new()),
        }
    }

    /// Cached nodes of one kind.
    pub async fn cached_nodes(&self, scope: &Scope, biz_id: i64, kind: &str) -> Result<Vec<Node>> {
        Ok(self
            .nodes
            .get_node_info_cache(&self.key, &scope.tenant, biz_id, kind)
            .await?)
    }
}

/// Walk a table in id order with a `> last` cursor.
pub async fn paged_find(
    store: &dyn DocumentStore,
    tenant: &str,
    table: &str,
    id_field: &str,
    cond: &Filter,
    fields: &[&str],
) -> Result<Vec<Document>> {
    let opts = FindOptions::new()
        .fields(fields)
        .sort(id_field)
        .limit(PAGE_SIZE);
    let mut docs = Vec::new();
    let mut last: Option<i64> = None;

    loop {
        let filter = match last {
            Some(last) => cond.clone().and(Filter::gt(id_field, last)),
            None => cond.clone(),
        };
        let page = store.find(tenant, table, &filter, &opts).await?;
        let full = page.len() as i64 >= PAGE_SIZE;
        if let Some(doc) = page.last() {
            last = Some(doc_i64(doc, id_field, table)?);
        }
        docs.extend(page);
        if !full {
            break;
        }
    }

    Ok(docs)
}

/// `In` conditions over `ids`, chunked.
pub fn id_conds(field: &str, ids: &[i64]) -> Vec<Filter> {
    ids.chunks(ID_CHUNK_SIZE)
        .map(|chunk| Filter::in_ids(field, chunk))
        .collect()
}

/// Attach children to their parents and roll child counts up.
///
/// A parent's count becomes the sum of its children's counts when any child
/// carries one. Children whose parent is not in `parents` are dropped.
pub fn combine(mut parents: Vec<Node>, children: Vec<Node>) -> Vec<Node> {
    let mut by_parent: HashMap<i64, Vec<Node>> = HashMap::new();
    for child in children {
        by_parent.entry(child.parent_id).or_default().push(child);
    }

    for parent in parents.iter_mut() {
        let Some(children) = by_parent.remove(&parent.id) else {
            continue;
        };
        let counts: Vec<i64> = children.iter().filter_map(|c| c.count).collect();
        if !counts.is_empty() {
            parent.count = Some(parent.count.unwrap_or_default() + counts.iter().sum::<i64>());
        }
        parent.sub_nodes.extend(children);
    }

    for (parent_id, orphans) in by_parent {
        warn!(parent_id, orphans = orphans.len(), "Dropping nodes without a parent");
    }

    parents
}
