//! Tests for the topology service.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use super::*;
use crate::config::{QueueConfig, StaticDynamicConfig, TopoConfig, WatchConfig};
use crate::interfaces::KvCache;
use crate::storage::mock::{MockCache, MockChangeStream, MockDocumentStore, MockTokenStore};
use crate::topo::{
    BizRef, GetBizTopoOption, Key, KeyRegistry, RefreshBizTopoOption, Scope, TopoError, TopoType,
    TopologyManager,
};
use crate::utils::task::TaskHandle;

const TENANT: &str = "t1";
const TTL: Duration = Duration::from_secs(60);

struct Fixture {
    store: Arc<MockDocumentStore>,
    cache: Arc<MockCache>,
    service: Arc<TopoService>,
}

impl Fixture {
    fn with_keys(keys: KeyRegistry, tenants: &[&str]) -> Self {
        let store = Arc::new(MockDocumentStore::new());
        let cache = Arc::new(MockCache::new());
        let manager = Arc::new(TopologyManager::new(
            store.clone(),
            cache.clone(),
            Arc::new(keys),
        ));
        let service = Arc::new(TopoService::new(
            manager,
            tenants.iter().map(|t| t.to_string()).collect(),
            QueueConfig::default(),
        ));
        Self {
            store,
            cache,
            service,
        }
    }

    fn new() -> Self {
        Self::with_keys(
            KeyRegistry::from_config(&TopoConfig::default(), Arc::new(StaticDynamicConfig::new())),
            &[TENANT],
        )
    }

    /// Business 1 with one cluster, one namespace and one workload.
    async fn seed(&self, tenant: &str, biz: i64) {
        self.store
            .insert(tenant, "cc_ApplicationBase", json!({"bk_biz_id": biz, "bk_biz_name": format!("biz-{}", biz)}))
            .await;
        self.store
            .insert(tenant, "cc_KubeCluster", json!({"id": biz * 10, "name": "c", "bk_biz_id": biz}))
            .await;
        self.store
            .insert(
                tenant,
                "cc_KubeNamespace",
                json!({"id": biz * 100, "name": "ns", "bk_cluster_id": biz * 10, "bk_biz_id": biz}),
            )
            .await;
        self.store
            .insert(
                tenant,
                "cc_KubeDeployment",
                json!({"id": biz * 1000, "name": "wl", "bk_namespace_id": biz * 100, "bk_biz_id": biz}),
            )
            .await;
    }

    fn blob_key(&self, topo_type: TopoType, tenant: &str, biz: i64) -> String {
        format!("cc:v3:biz_topo:{}:{}:{}", topo_type, tenant, biz)
    }

    async fn wait_for_blob(&self, key: &str) -> String {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(blob) = self.cache.raw_get(key).await {
                    return blob;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap()
    }
}

fn scope() -> Scope {
    Scope::new(TENANT, "rid-test")
}

fn get(biz_id: i64) -> GetBizTopoOption {
    GetBizTopoOption { biz_id }
}

// ============================================================================
// get_biz_topo
// ============================================================================

#[tokio::test]
async fn test_get_serves_cached_blob_without_store_access() {
    let fx = Fixture::new();
    fx.cache
        .set(&fx.blob_key(TopoType::Kube, TENANT, 1), "{\"cached\":true}", TTL)
        .await
        .unwrap();

    let blob = fx
        .service
        .get_biz_topo(&scope(), TopoType::Kube, &get(1))
        .await
        .unwrap();

    assert_eq!(blob, "{\"cached\":true}");
    assert_eq!(fx.store.find_calls(), 0);
}

#[tokio::test]
async fn test_get_miss_generates_and_caches() {
    let fx = Fixture::new();
    fx.seed(TENANT, 1).await;

    let blob = fx
        .service
        .get_biz_topo(&scope(), TopoType::Kube, &get(1))
        .await
        .unwrap();

    let tree: Value = serde_json::from_str(&blob).unwrap();
    assert_eq!(tree["biz"]["nm"], "biz-1");
    assert_eq!(tree["nds"][0]["nds"][0]["nds"][0]["cnt"], 0);
    assert_eq!(
        fx.wait_for_blob(&fx.blob_key(TopoType::Kube, TENANT, 1)).await,
        blob
    );
}

#[tokio::test]
async fn test_get_miss_returns_tree_when_cache_write_fails() {
    let fx = Fixture::new();
    fx.seed(TENANT, 1).await;
    fx.cache.set_fail_on_write(true).await;

    let blob = fx
        .service
        .get_biz_topo(&scope(), TopoType::Kube, &get(1))
        .await
        .unwrap();

    let tree: Value = serde_json::from_str(&blob).unwrap();
    assert_eq!(tree["biz"]["id"], 1);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(fx
        .cache
        .raw_get(&fx.blob_key(TopoType::Kube, TENANT, 1))
        .await
        .is_none());
}

#[tokio::test]
async fn test_get_degrades_cache_read_error_to_generation() {
    let fx = Fixture::new();
    fx.seed(TENANT, 1).await;
    fx.cache.set_fail_on_read(true).await;

    let blob = fx
        .service
        .get_biz_topo(&scope(), TopoType::Brief, &get(1))
        .await
        .unwrap();

    let tree: Value = serde_json::from_str(&blob).unwrap();
    assert_eq!(tree["idle"], json!([]));
    assert_eq!(tree["nds"], json!([]));
}

#[tokio::test]
async fn test_get_regenerates_empty_blob() {
    let fx = Fixture::new();
    fx.seed(TENANT, 1).await;
    fx.cache
        .set(&fx.blob_key(TopoType::Kube, TENANT, 1), "", TTL)
        .await
        .unwrap();

    let blob = fx
        .service
        .get_biz_topo(&scope(), TopoType::Kube, &get(1))
        .await
        .unwrap();

    assert!(blob.starts_with("{\"biz\""));
}

#[tokio::test]
async fn test_get_unregistered_type_fails_fast() {
    let mut keys = KeyRegistry::new();
    keys.register(Key::new(
        TopoType::Kube,
        Duration::from_secs(60),
        Arc::new(StaticDynamicConfig::new()),
    ));
    let fx = Fixture::with_keys(keys, &[TENANT]);

    let result = fx
        .service
        .get_biz_topo(&scope(), TopoType::Brief, &get(1))
        .await;

    assert!(matches!(result, Err(TopoError::InvalidTopoType(_))));
    assert_eq!(fx.store.find_calls(), 0);
}

#[tokio::test]
async fn test_get_unknown_business_is_an_error() {
    let fx = Fixture::new();

    let result = fx
        .service
        .get_biz_topo(&scope(), TopoType::Kube, &get(404))
        .await;

    assert!(matches!(result, Err(TopoError::BizNotFound { biz_id: 404, .. })));
}

// ============================================================================
// refresh and sweep
// ============================================================================

#[tokio::test]
async fn test_refresh_writes_blob_and_dequeues() {
    let fx = Fixture::new();
    fx.seed(TENANT, 1).await;
    let biz = BizRef::new(TENANT, 1);
    fx.service.queues().push(TopoType::Kube, [biz.clone()]).await;

    let blob = fx
        .service
        .refresh_biz_topo(&scope(), TopoType::Kube, &RefreshBizTopoOption { biz_id: 1 })
        .await
        .unwrap();

    assert_eq!(
        fx.cache
            .raw_get(&fx.blob_key(TopoType::Kube, TENANT, 1))
            .await
            .as_deref(),
        Some(blob.as_str())
    );
    assert!(fx.service.queues().get(TopoType::Kube).unwrap().is_empty().await);
}

#[tokio::test]
async fn test_failed_refresh_keeps_queued_business() {
    let fx = Fixture::new();
    let biz = BizRef::new(TENANT, 1);
    fx.service.queues().push(TopoType::Kube, [biz.clone()]).await;
    fx.store.set_fail_on_find(true).await;

    let result = fx
        .service
        .refresh_biz_topo(&scope(), TopoType::Kube, &RefreshBizTopoOption { biz_id: 1 })
        .await;

    assert!(result.is_err());
    assert!(fx.service.queues().get(TopoType::Kube).unwrap().contains(&biz).await);
}

#[tokio::test]
async fn test_sweep_refreshes_every_business_of_every_tenant() {
    let keys =
        KeyRegistry::from_config(&TopoConfig::default(), Arc::new(StaticDynamicConfig::new()));
    let fx = Fixture::with_keys(keys, &["t1", "t2"]);
    fx.seed("t1", 1).await;
    fx.seed("t1", 2).await;
    fx.seed("t2", 3).await;
    fx.service
        .queues()
        .push(TopoType::Kube, [BizRef::new("t1", 2), BizRef::new("t2", 9)])
        .await;

    let refreshed = fx.service.sweep(TopoType::Kube).await;

    assert_eq!(refreshed, 3);
    for (tenant, biz) in [("t1", 1), ("t1", 2), ("t2", 3)] {
        assert!(fx
            .cache
            .raw_get(&fx.blob_key(TopoType::Kube, tenant, biz))
            .await
            .is_some());
    }
    let queue = fx.service.queues().get(TopoType::Kube).unwrap();
    assert!(!queue.contains(&BizRef::new("t1", 2)).await);
    assert!(queue.contains(&BizRef::new("t2", 9)).await);
}

#[tokio::test]
async fn test_sweep_survives_store_failure() {
    let fx = Fixture::new();
    fx.seed(TENANT, 1).await;
    fx.store.set_fail_on_find(true).await;

    assert_eq!(fx.service.sweep(TopoType::Brief).await, 0);
}

// ============================================================================
// background tasks
// ============================================================================

#[tokio::test]
async fn test_start_sweeps_then_stops() {
    let fx = Fixture::new();
    fx.seed(TENANT, 1).await;
    let mut tasks = TaskHandle::new();

    fx.service.start(&mut tasks);
    assert_eq!(tasks.len(), 4);

    for topo_type in TopoType::ALL {
        fx.wait_for_blob(&fx.blob_key(topo_type, TENANT, 1)).await;
    }
    tokio::time::timeout(Duration::from_secs(2), tasks.shutdown())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_queued_business_is_refreshed_by_worker() {
    let fx = Fixture::new();
    let mut tasks = TaskHandle::new();
    fx.service.start(&mut tasks);
    // Let the first, empty, sweep pass.
    tokio::time::sleep(Duration::from_millis(20)).await;

    fx.seed(TENANT, 7).await;
    fx.service
        .queues()
        .push(TopoType::Kube, [BizRef::new(TENANT, 7)])
        .await;

    let blob = fx.wait_for_blob(&fx.blob_key(TopoType::Kube, TENANT, 7)).await;
    assert!(blob.contains("\"nm\":\"biz-7\""));
    tasks.shutdown().await;
}

#[tokio::test]
async fn test_watcher_covers_every_watched_table() {
    let fx = Fixture::new();
    let watcher = fx
        .service
        .watcher(
            Arc::new(MockChangeStream::new()),
            Arc::new(MockTokenStore::new()),
            WatchConfig::default(),
        )
        .unwrap();
    let mut tasks = TaskHandle::new();

    watcher.start(&mut tasks);

    // business, set, module, cluster, namespace, pod and 8 workload tables
    assert_eq!(tasks.len(), 14);
    tasks.shutdown().await;
}
