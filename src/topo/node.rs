//! Node cache store.
//!
//! Per-node entries let watchers patch single nodes without rewriting a whole
//! tree. Each (business, kind) pair has an id index set used to enumerate the
//! kind and to find entries that disappeared from the primary store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::Result;
use super::key::Key;
use super::types::Node;
use crate::interfaces::{CacheOp, KvCache};

/// Index members read per SSCAN round trip.
pub const SCAN_PAGE_SIZE: usize = 500;

/// Nodes written per pipeline during reconciliation.
pub const UPSERT_PAGE_SIZE: usize = 200;

/// Cached node detail.
#[derive(Debug, Serialize, Deserialize)]
struct NodeDetail {
    id: i64,
    nm: String,
    par: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    ext: Option<serde_json::Value>,
}

impl NodeDetail {
    fn into_node(self, kind: &str) -> Node {
        let mut node = Node::new(kind, self.id, self.nm, self.par);
        node.extra = self.ext;
        node
    }
}

impl From<&Node> for NodeDetail {
    fn from(node: &Node) -> Self {
        Self {
            id: node.id,
            nm: node.name.clone(),
            par: node.parent_id,
            ext: node.extra.clone(),
        }
    }
}

/// Node-level cache operations over a shared key-value cache.
///
/// Every operation addresses one (tenant, business, kind) triple inside the
/// namespace of `key`.
#[derive(Clone)]
pub struct NodeCache {
    cache: Arc<dyn KvCache>,
}

impl NodeCache {
    pub fn new(cache: Arc<dyn KvCache>) -> Self {
        Self { cache }
    }

    /// Write node details and add them to the kind's index.
    ///
    /// The index expiry is refreshed in the same batch so it never outlives
    /// less than the details it references.
    pub async fn add_node_info_cache(
        &self,
        key: &Key,
        tenant: &str,
        biz_id: i64,
        kind: &str,
        nodes: &[Node],
    ) -> Result<()> {
        if nodes.is_empty() {
            return Ok(());
        }

        let list_key = key.node_list_key(tenant, biz_id, kind);
        let mut ops = Vec::with_capacity(nodes.len() + 2);
        let mut members = Vec::with_capacity(nodes.len());
        for node in nodes {
            ops.push(CacheOp::Set {
                key: key.node_key(tenant, biz_id, kind, node.id),
                value: serde_json::to_string(&NodeDetail::from(node))?,
                ttl: key.ttl(),
            });
            members.push(node.id.to_string());
        }
        ops.push(CacheOp::SAdd {
            key: list_key.clone(),
            members,
        });
        ops.push(CacheOp::Expire {
            key: list_key,
            ttl: key.ttl(),
        });

        self.cache.pipeline(ops).await?;
        Ok(())
    }

    /// Delete node details and drop them from the kind's index.
    pub async fn delete_node_info_cache(
        &self,
        key: &Key,
        tenant: &str,
        biz_id: i64,
        kind: &str,
        ids: &[i64],
    ) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let detail_keys = ids
            .iter()
            .map(|id| key.node_key(tenant, biz_id, kind, *id))
            .collect();
        let ops = vec![
            CacheOp::Del(detail_keys),
            CacheOp::SRem {
                key: key.node_list_key(tenant, biz_id, kind),
                members: ids.iter().map(|id| id.to_string()).collect(),
            },
        ];
        self.cache.pipeline(ops).await?;
        Ok(())
    }

    /// All cached nodes of a kind.
    ///
    /// Index members whose detail is missing or malformed are skipped.
    pub async fn get_node_info_cache(
        &self,
        key: &Key,
        tenant: &str,
        biz_id: i64,
        kind: &str,
    ) -> Result<Vec<Node>> {
        let ids = self.scan_ids(key, tenant, biz_id, kind).await?;
        let mut nodes = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(SCAN_PAGE_SIZE) {
            let keys: Vec<String> = chunk
                .iter()
                .map(|id| key.node_key(tenant, biz_id, kind, *id))
                .collect();
            let values = self.cache.mget(&keys).await?;

            for (id, value) in chunk.iter().zip(values) {
                let Some(raw) = value else {
                    debug!(tenant, biz_id, kind, id, "Indexed node detail missing, skipping");
                    continue;
                };
                match serde_json::from_str::<NodeDetail>(&raw) {
                    Ok(detail) => nodes.push(detail.into_node(kind)),
                    Err(e) => {
                        warn!(tenant, biz_id, kind, id, error = %e, "Malformed node detail, skipping");
                    }
                }
            }
        }

        Ok(nodes)
    }

    /// Bring a kind's cache in line with the authoritative node set.
    ///
    /// Upserts every node, then deletes the detail, index membership and
    /// count of every cached id absent from `nodes`.
    pub async fn cross_compare_node_info_cache(
        &self,
        key: &Key,
        tenant: &str,
        biz_id: i64,
        kind: &str,
        nodes: &[Node],
    ) -> Result<()> {
        for page in nodes.chunks(UPSERT_PAGE_SIZE) {
            self.add_node_info_cache(key, tenant, biz_id, kind, page)
                .await?;
        }

        let current: HashSet<i64> = nodes.iter().map(|n| n.id).collect();
        let stale: Vec<i64> = self
            .scan_ids(key, tenant, biz_id, kind)
            .await?
            .into_iter()
            .filter(|id| !current.contains(id))
            .collect();

        if !stale.is_empty() {
            debug!(tenant, biz_id, kind, stale = stale.len(), "Removing stale cached nodes");
            self.delete_node_info_cache(key, tenant, biz_id, kind, &stale)
                .await?;
            self.delete_node_count_cache(key, tenant, biz_id, kind, &stale)
                .await?;
        }
        Ok(())
    }

    /// Write rollup counts.
    pub async fn add_node_count_cache(
        &self,
        key: &Key,
        tenant: &str,
        biz_id: i64,
        kind: &str,
        counts: &HashMap<i64, i64>,
    ) -> Result<()> {
        if counts.is_empty() {
            return Ok(());
        }

        let ops = counts
            .iter()
            .map(|(id, count)| CacheOp::Set {
                key: key.node_count_key(tenant, biz_id, kind, *id),
                value: count.to_string(),
                ttl: key.ttl(),
            })
            .collect();
        self.cache.pipeline(ops).await?;
        Ok(())
    }

    /// Delete rollup counts.
    pub async fn delete_node_count_cache(
        &self,
        key: &Key,
        tenant: &str,
        biz_id: i64,
        kind: &str,
        ids: &[i64],
    ) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let keys = ids
            .iter()
            .map(|id| key.node_count_key(tenant, biz_id, kind, *id))
            .collect();
        self.cache.pipeline(vec![CacheOp::Del(keys)]).await?;
        Ok(())
    }

    /// Cached rollup counts of the given nodes. Missing or malformed counts
    /// are left out of the result.
    pub async fn get_node_count_cache(
        &self,
        key: &Key,
        tenant: &str,
        biz_id: i64,
        kind: &str,
        ids: &[i64],
    ) -> Result<HashMap<i64, i64>> {
        let mut counts = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(SCAN_PAGE_SIZE) {
            let keys: Vec<String> = chunk
                .iter()
                .map(|id| key.node_count_key(tenant, biz_id, kind, *id))
                .collect();
            let values = self.cache.mget(&keys).await?;
            for (id, value) in chunk.iter().zip(values) {
                match value.map(|raw| raw.parse::<i64>()) {
                    Some(Ok(count)) => {
                        counts.insert(*id, count);
                    }
                    Some(Err(e)) => {
                        warn!(tenant, biz_id, kind, id, error = %e, "Malformed node count, skipping");
                    }
                    None => {}
                }
            }
        }
        Ok(counts)
    }

    async fn scan_ids(&self, key: &Key, tenant: &str, biz_id: i64, kind: &str) -> Result<Vec<i64>> {
        let list_key = key.node_list_key(tenant, biz_id, kind);
        let mut ids = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = 0;

        loop {
            let (next, members) = self.cache.sscan(&list_key, cursor, SCAN_PAGE_SIZE).await?;
            for member in members {
                match member.parse::<i64>() {
                    Ok(id) if seen.insert(id) => ids.push(id),
                    Ok(_) => {}
                    Err(_) => warn!(key = %list_key, member = %member, "Non-numeric node id in index"),
                }
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(ids)
    }
}
