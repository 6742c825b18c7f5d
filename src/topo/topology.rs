//! Topology orchestration: pick the level chain and tree of a topology type,
//! generate a business's tree and keep its cached blob current.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::error::{Result, TopoError};
use super::key::{Key, KeyRegistry};
use super::level::{brief_levels, kube_levels, paged_find, Level};
use super::node::NodeCache;
use super::schema::{as_i64, doc_i64, doc_str, FIELD_BIZ_ID, FIELD_BIZ_NAME, FIELD_DEFAULT, TABLE_BIZ};
use super::tree::{BriefTree, GenericTree, Tree};
use super::types::{BizInfo, Scope, TopoTree, TopoType};
use crate::interfaces::{lookup, DocumentStore, Filter, FindOptions, KvCache};

/// Level chain and tree of one topology type.
struct Topology {
    key: Arc<Key>,
    level: Arc<dyn Level>,
    tree: Arc<dyn Tree>,
}

/// Generates business topologies and maintains their cached blobs.
pub struct TopologyManager {
    store: Arc<dyn DocumentStore>,
    cache: Arc<dyn KvCache>,
    nodes: NodeCache,
    keys: Arc<KeyRegistry>,
    topologies: HashMap<TopoType, Topology>,
}

impl TopologyManager {
    /// Build a manager with a topology for every type in `keys`.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        cache: Arc<dyn KvCache>,
        keys: Arc<KeyRegistry>,
    ) -> Self {
        let nodes = NodeCache::new(cache.clone());
        let mut topologies = HashMap::new();

        for topo_type in keys.types() {
            let Ok(key) = keys.get(topo_type) else {
                continue;
            };
            let (level, tree): (Arc<dyn Level>, Arc<dyn Tree>) = match topo_type {
                TopoType::Brief => (
                    brief_levels(store.clone(), nodes.clone(), key.clone()),
                    Arc::new(BriefTree),
                ),
                TopoType::Kube => (
                    kube_levels(store.clone(), nodes.clone(), key.clone()),
                    Arc::new(GenericTree),
                ),
            };
            topologies.insert(topo_type, Topology { key, level, tree });
        }

        Self {
            store,
            cache,
            nodes,
            keys,
            topologies,
        }
    }

    pub fn keys(&self) -> &Arc<KeyRegistry> {
        &self.keys
    }

    pub fn node_cache(&self) -> &NodeCache {
        &self.nodes
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<dyn KvCache> {
        &self.cache
    }

    /// Registered topology types.
    pub fn types(&self) -> Vec<TopoType> {
        self.keys.types()
    }

    fn topology(&self, topo_type: TopoType) -> Result<&Topology> {
        self.topologies
            .get(&topo_type)
            .ok_or_else(|| TopoError::InvalidTopoType(topo_type.to_string()))
    }

    /// Basic info of a business.
    pub async fn biz_info(&self, scope: &Scope, biz_id: i64) -> Result<BizInfo> {
        let opts = FindOptions::new()
            .fields(&[FIELD_BIZ_ID, FIELD_BIZ_NAME, FIELD_DEFAULT])
            .limit(1);
        let docs = self
            .store
            .find(&scope.tenant, TABLE_BIZ, &Filter::eq(FIELD_BIZ_ID, biz_id), &opts)
            .await?;
        let doc = docs.first().ok_or_else(|| TopoError::BizNotFound {
            tenant: scope.tenant.clone(),
            biz_id,
        })?;

        Ok(BizInfo {
            id: biz_id,
            name: doc_str(doc, FIELD_BIZ_NAME),
            default: lookup(doc, FIELD_DEFAULT)
                .and_then(as_i64)
                .unwrap_or_default(),
        })
    }

    /// Every business id of a tenant, ascending.
    pub async fn list_biz_ids(&self, tenant: &str) -> Result<Vec<i64>> {
        let docs = paged_find(
            self.store.as_ref(),
            tenant,
            TABLE_BIZ,
            FIELD_BIZ_ID,
            &Filter::All,
            &[FIELD_BIZ_ID],
        )
        .await?;
        docs.iter()
            .map(|doc| doc_i64(doc, FIELD_BIZ_ID, TABLE_BIZ))
            .collect()
    }

    /// Generate a business's tree from the primary store or the node cache.
    pub async fn gen_biz_topo(
        &self,
        scope: &Scope,
        topo_type: TopoType,
        biz_id: i64,
        by_cache: bool,
    ) -> Result<TopoTree> {
        let topology = self.topology(topo_type)?;
        let biz = self.biz_info(scope, biz_id).await?;

        let nodes = if by_cache {
            topology.level.get_nodes_by_cache(scope, biz_id).await?
        } else {
            topology.level.get_nodes_by_db(scope, biz_id, &[]).await?
        };

        debug!(rid = %scope.rid, tenant = %scope.tenant, topo_type = %topo_type, biz_id,
            by_cache, top_nodes = nodes.len(), "Generated business topology");
        topology.tree.build(biz, nodes)
    }

    /// Regenerate a business's tree and store it as the cached blob.
    ///
    /// A cache-path refresh of a business without a blob goes to the primary
    /// store instead, since its node cache was never primed. Failing to write
    /// the blob is logged and does not fail the refresh.
    pub async fn refresh_biz_topo(
        &self,
        scope: &Scope,
        topo_type: TopoType,
        biz_id: i64,
        by_cache: bool,
    ) -> Result<String> {
        let topology = self.topology(topo_type)?;
        let blob_key = topology.key.biz_topo_key(&scope.tenant, biz_id);

        let by_cache = by_cache
            && match self.cache.exists(&blob_key).await {
                Ok(exists) => exists,
                Err(e) => {
                    warn!(rid = %scope.rid, key = %blob_key, error = %e,
                        "Blob lookup failed, refreshing from store");
                    false
                }
            };

        let tree = self.gen_biz_topo(scope, topo_type, biz_id, by_cache).await?;
        let json = tree.to_json()?;

        match self.cache.set(&blob_key, &json, topology.key.ttl()).await {
            Ok(()) => {
                debug!(rid = %scope.rid, key = %blob_key, by_cache, "Stored business topology");
            }
            Err(e) => {
                warn!(rid = %scope.rid, key = %blob_key, error = %e,
                    "Failed to store business topology");
            }
        }
        Ok(json)
    }

    /// Cached blob of a business, if any.
    pub async fn get_cached_biz_topo(
        &self,
        scope: &Scope,
        topo_type: TopoType,
        biz_id: i64,
    ) -> Result<Option<String>> {
        let key = self.keys.get(topo_type)?;
        Ok(self
            .cache
            .get(&key.biz_topo_key(&scope.tenant, biz_id))
            .await?)
    }

    /// Delete a business's blob of every topology type.
    pub async fn delete_biz_topo(&self, tenant: &str, biz_id: i64) -> Result<()> {
        let keys: Vec<String> = self
            .keys
            .types()
            .into_iter()
            .filter_map(|t| self.keys.get(t).ok())
            .map(|key| key.biz_topo_key(tenant, biz_id))
            .collect();
        self.cache.del(&keys).await?;
        info!(tenant, biz_id, "Deleted business topology blobs");
        Ok(())
    }
}
