//! Tests for topology levels.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use super::*;
use crate::config::StaticDynamicConfig;
use crate::storage::mock::{MockCache, MockDocumentStore};
use crate::topo::error::TopoError;
use crate::topo::types::TopoType;

const TENANT: &str = "t1";

struct Fixture {
    store: Arc<MockDocumentStore>,
    cache: Arc<MockCache>,
    nodes: NodeCache,
    key: Arc<Key>,
}

impl Fixture {
    fn new(topo_type: TopoType) -> Self {
        let cache = Arc::new(MockCache::new());
        Self {
            store: Arc::new(MockDocumentStore::new()),
            nodes: NodeCache::new(cache.clone()),
            cache,
            key: Arc::new(Key::new(
                topo_type,
                Duration::from_secs(600),
                Arc::new(StaticDynamicConfig::new()),
            )),
        }
    }

    fn kube(&self) -> Arc<dyn Level> {
        kube_levels(self.store.clone(), self.nodes.clone(), self.key.clone())
    }

    fn brief(&self) -> Arc<dyn Level> {
        brief_levels(self.store.clone(), self.nodes.clone(), self.key.clone())
    }

    async fn insert(&self, table: &str, doc: serde_json::Value) {
        self.store.insert(TENANT, table, doc).await;
    }

    async fn cluster(&self, id: i64, biz: i64) {
        self.insert("cc_KubeCluster", json!({"id": id, "name": format!("cluster-{}", id), "bk_biz_id": biz}))
            .await;
    }

    async fn namespace(&self, id: i64, cluster: i64, biz: i64) {
        self.insert(
            "cc_KubeNamespace",
            json!({"id": id, "name": format!("ns-{}", id), "bk_cluster_id": cluster, "bk_biz_id": biz}),
        )
        .await;
    }

    async fn workload(&self, table: &str, id: i64, ns: i64, biz: i64) {
        self.insert(
            table,
            json!({"id": id, "name": format!("wl-{}", id), "bk_namespace_id": ns, "bk_biz_id": biz}),
        )
        .await;
    }

    async fn pod(&self, id: i64, kind: &str, workload: i64, containers: &[i64]) {
        self.insert(
            "cc_KubePod",
            json!({"id": id, "ref": {"kind": kind, "id": workload}, "bk_biz_id": 1}),
        )
        .await;
        for container in containers {
            self.insert("cc_KubeContainer", json!({"id": container, "bk_pod_id": id}))
                .await;
        }
    }
}

fn scope() -> Scope {
    Scope::new(TENANT, "test-rid")
}

/// Sort every level by (kind, id) so trees from different paths compare.
fn normalize(mut nodes: Vec<Node>) -> Vec<Node> {
    nodes.sort_by(|a, b| (a.kind.as_str(), a.id).cmp(&(b.kind.as_str(), b.id)));
    for node in nodes.iter_mut() {
        node.sub_nodes = normalize(std::mem::take(&mut node.sub_nodes));
    }
    nodes
}

fn count_nodes(nodes: &[Node]) -> usize {
    nodes.iter().map(|n| 1 + count_nodes(&n.sub_nodes)).sum()
}

fn assert_parent_invariant(nodes: &[Node]) {
    for node in nodes {
        for child in &node.sub_nodes {
            assert_eq!(child.parent_id, node.id, "child {} of {}", child.id, node.id);
        }
        assert_parent_invariant(&node.sub_nodes);
    }
}

#[tokio::test]
async fn test_kube_tree_with_empty_workloads() {
    let fx = Fixture::new(TopoType::Kube);
    fx.cluster(10, 1).await;
    fx.namespace(20, 10, 1).await;
    fx.namespace(21, 10, 1).await;
    fx.workload("cc_KubeDeployment", 30, 20, 1).await;
    fx.workload("cc_KubeJob", 31, 21, 1).await;

    let tree = fx.kube().get_nodes_by_db(&scope(), 1, &[]).await.unwrap();

    assert_eq!(tree.len(), 1);
    let cluster = &tree[0];
    assert_eq!((cluster.kind.as_str(), cluster.id), ("cluster", 10));
    assert_eq!(cluster.sub_nodes.len(), 2);
    for ns in &cluster.sub_nodes {
        assert_eq!(ns.kind, "namespace");
        assert_eq!(ns.sub_nodes.len(), 1);
        assert_eq!(ns.sub_nodes[0].count, Some(0));
    }
    assert_eq!(cluster.sub_nodes[0].sub_nodes[0].kind, "deployment");
    assert_eq!(cluster.sub_nodes[1].sub_nodes[0].kind, "job");
    assert_parent_invariant(&tree);
}

#[tokio::test]
async fn test_kube_counts_roll_up() {
    let fx = Fixture::new(TopoType::Kube);
    fx.cluster(10, 1).await;
    fx.namespace(20, 10, 1).await;
    fx.namespace(21, 10, 1).await;
    fx.workload("cc_KubeDeployment", 30, 20, 1).await;
    fx.workload("cc_KubeStatefulSet", 31, 20, 1).await;
    fx.workload("cc_KubeDeployment", 32, 21, 1).await;
    fx.pod(40, "deployment", 30, &[100, 101]).await;
    fx.pod(41, "deployment", 30, &[102]).await;
    fx.pod(42, "statefulSet", 31, &[103]).await;
    // Same id, other kind: must not count for deployment 32.
    fx.pod(43, "statefulSet", 32, &[104]).await;

    let tree = normalize(fx.kube().get_nodes_by_db(&scope(), 1, &[]).await.unwrap());

    let cluster = &tree[0];
    assert_eq!(cluster.count, Some(4));
    let ns20 = &cluster.sub_nodes[0];
    assert_eq!(ns20.count, Some(4));
    let counts: Vec<(String, Option<i64>)> = ns20
        .sub_nodes
        .iter()
        .map(|n| (n.kind.clone(), n.count))
        .collect();
    assert_eq!(
        counts,
        vec![
            ("deployment".to_string(), Some(3)),
            ("statefulSet".to_string(), Some(1))
        ]
    );
    assert_eq!(cluster.sub_nodes[1].count, Some(0));

    let cached = fx
        .nodes
        .get_node_count_cache(&fx.key, TENANT, 1, "deployment", &[30, 32])
        .await
        .unwrap();
    assert_eq!(cached.get(&30), Some(&3));
    assert_eq!(cached.get(&32), Some(&0));
}

fn cluster_ids(tree: &[Node]) -> Vec<(i64, Vec<i64>)> {
    tree.iter()
        .map(|c| (c.id, c.sub_nodes.iter().map(|n| n.id).collect()))
        .collect()
}

#[tokio::test]
async fn test_kube_shared_namespace_appears_under_borrowing_biz() {
    let fx = Fixture::new(TopoType::Kube);
    fx.cluster(10, 1).await;
    fx.namespace(20, 10, 1).await;
    // Cluster 11 belongs to biz 2 and lends namespace 22 to biz 1.
    fx.cluster(11, 2).await;
    fx.namespace(22, 11, 1).await;
    fx.namespace(23, 11, 2).await;
    fx.workload("cc_KubeDeployment", 30, 22, 1).await;
    fx.insert(
        "cc_NsSharedClusterRelation",
        json!({"bk_namespace_id": 22, "bk_cluster_id": 11, "bk_biz_id": 1, "bk_asst_biz_id": 2}),
    )
    .await;

    let levels = fx.kube();
    let borrower = normalize(levels.get_nodes_by_db(&scope(), 1, &[]).await.unwrap());
    assert_eq!(cluster_ids(&borrower), vec![(10, vec![20]), (11, vec![22])]);
    assert_eq!(borrower[1].sub_nodes[0].sub_nodes[0].id, 30);

    let cached = normalize(levels.get_nodes_by_cache(&scope(), 1).await.unwrap());
    assert_eq!(cached, borrower);

    let owner = normalize(levels.get_nodes_by_db(&scope(), 2, &[]).await.unwrap());
    assert_eq!(cluster_ids(&owner), vec![(11, vec![22, 23])]);
}

#[tokio::test]
async fn test_kube_namespace_of_other_biz_in_borrowed_cluster_is_hidden() {
    let fx = Fixture::new(TopoType::Kube);
    fx.cluster(11, 2).await;
    fx.namespace(22, 11, 1).await;
    fx.namespace(24, 11, 3).await;
    fx.insert(
        "cc_NsSharedClusterRelation",
        json!({"bk_namespace_id": 22, "bk_cluster_id": 11, "bk_biz_id": 1, "bk_asst_biz_id": 2}),
    )
    .await;
    fx.insert(
        "cc_NsSharedClusterRelation",
        json!({"bk_namespace_id": 24, "bk_cluster_id": 11, "bk_biz_id": 3, "bk_asst_biz_id": 2}),
    )
    .await;

    let borrower = normalize(fx.kube().get_nodes_by_db(&scope(), 1, &[]).await.unwrap());

    assert_eq!(cluster_ids(&borrower), vec![(11, vec![22])]);
}

#[tokio::test]
async fn test_kube_tree_pages_and_keeps_every_node_once() {
    let fx = Fixture::new(TopoType::Kube);
    fx.cluster(1, 5).await;
    fx.cluster(2, 5).await;
    let mut flat = 2;
    for ns in 100..350 {
        fx.namespace(ns, 1 + ns % 2, 5).await;
        fx.workload("cc_KubeDaemonSet", ns * 10, ns, 5).await;
        flat += 2;
    }

    let tree = fx.kube().get_nodes_by_db(&scope(), 5, &[]).await.unwrap();

    assert_eq!(count_nodes(&tree), flat);
    assert_parent_invariant(&tree);
}

#[tokio::test]
async fn test_kube_cache_path_matches_db_path() {
    let fx = Fixture::new(TopoType::Kube);
    fx.cluster(10, 1).await;
    fx.namespace(20, 10, 1).await;
    fx.namespace(21, 10, 1).await;
    fx.workload("cc_KubeGameDeployment", 30, 20, 1).await;
    fx.workload("cc_KubePodWorkload", 31, 21, 1).await;
    fx.pod(40, "pods", 31, &[100, 101]).await;

    let levels = fx.kube();
    let by_db = normalize(levels.get_nodes_by_db(&scope(), 1, &[]).await.unwrap());
    let calls = fx.store.find_calls();
    let by_cache = normalize(levels.get_nodes_by_cache(&scope(), 1).await.unwrap());

    assert_eq!(by_db, by_cache);
    assert_eq!(fx.store.find_calls(), calls);
}

#[tokio::test]
async fn test_db_pass_removes_deleted_nodes_from_cache() {
    let fx = Fixture::new(TopoType::Kube);
    fx.cluster(10, 1).await;
    fx.namespace(20, 10, 1).await;
    let ns21 = fx.store.insert(
        TENANT,
        "cc_KubeNamespace",
        json!({"id": 21, "name": "ns-21", "bk_cluster_id": 10, "bk_biz_id": 1}),
    )
    .await;

    let levels = fx.kube();
    levels.get_nodes_by_db(&scope(), 1, &[]).await.unwrap();
    fx.store.remove(TENANT, "cc_KubeNamespace", &ns21).await;
    levels.get_nodes_by_db(&scope(), 1, &[]).await.unwrap();

    assert_eq!(
        fx.cache
            .raw_members(&fx.key.node_list_key(TENANT, 1, "namespace"))
            .await,
        vec!["20".to_string()]
    );
    let tree = levels.get_nodes_by_cache(&scope(), 1).await.unwrap();
    assert_eq!(tree[0].sub_nodes.len(), 1);
}

#[tokio::test]
async fn test_cache_failure_does_not_fail_db_path() {
    let fx = Fixture::new(TopoType::Kube);
    fx.cluster(10, 1).await;
    fx.namespace(20, 10, 1).await;
    fx.cache.set_fail_on_write(true).await;
    fx.cache.set_fail_on_read(true).await;

    let tree = fx.kube().get_nodes_by_db(&scope(), 1, &[]).await.unwrap();
    assert_eq!(tree[0].sub_nodes.len(), 1);
}

#[tokio::test]
async fn test_store_failure_propagates() {
    let fx = Fixture::new(TopoType::Kube);
    fx.store.set_fail_on_find(true).await;
    assert!(matches!(
        fx.kube().get_nodes_by_db(&scope(), 1, &[]).await,
        Err(TopoError::Store(_))
    ));
}

#[tokio::test]
async fn test_unparseable_node_aborts() {
    let fx = Fixture::new(TopoType::Kube);
    fx.cluster(10, 1).await;
    fx.insert(
        "cc_KubeNamespace",
        json!({"id": "twenty", "name": "ns", "bk_cluster_id": 10, "bk_biz_id": 1}),
    )
    .await;

    assert!(matches!(
        fx.kube().get_nodes_by_db(&scope(), 1, &[]).await,
        Err(TopoError::InvalidNode { .. })
    ));
}

#[tokio::test]
async fn test_brief_levels() {
    let fx = Fixture::new(TopoType::Brief);
    fx.insert("cc_SetBase", json!({"bk_set_id": 2, "bk_set_name": "idle pool", "bk_biz_id": 3, "default": 1}))
        .await;
    fx.insert("cc_SetBase", json!({"bk_set_id": 5, "bk_set_name": "web", "bk_biz_id": 3, "default": 0}))
        .await;
    fx.insert("cc_SetBase", json!({"bk_set_id": 6, "bk_set_name": "other biz", "bk_biz_id": 4, "default": 0}))
        .await;
    for (id, set, default) in [(20, 2, 1), (21, 2, 2), (50, 5, 0)] {
        fx.insert(
            "cc_ModuleBase",
            json!({"bk_module_id": id, "bk_module_name": format!("m{}", id), "bk_set_id": set, "bk_biz_id": 3, "default": default}),
        )
        .await;
    }

    let levels = fx.brief();
    let tree = normalize(levels.get_nodes_by_db(&scope(), 3, &[]).await.unwrap());

    assert_eq!(tree.len(), 2);
    assert_eq!(tree[0].extra, Some(json!({"default": 1})));
    assert_eq!(tree[0].sub_nodes.len(), 2);
    assert_eq!(tree[0].sub_nodes[1].extra, Some(json!({"default": 2})));
    assert_eq!(tree[1].sub_nodes[0].id, 50);
    assert!(tree.iter().all(|n| n.count.is_none()));

    let cached = normalize(levels.get_nodes_by_cache(&scope(), 3).await.unwrap());
    assert_eq!(cached, tree);
}

#[test]
fn test_combine_attaches_and_drops_orphans() {
    let parents = vec![Node::new("namespace", 1, "a", 9), Node::new("namespace", 2, "b", 9)];
    let mut with_count = Node::new("deployment", 10, "d", 1);
    with_count.count = Some(2);
    let mut zero = Node::new("job", 11, "j", 1);
    zero.count = Some(0);
    let children = vec![with_count, zero, Node::new("job", 12, "orphan", 3)];

    let combined = combine(parents, children);

    assert_eq!(combined[0].sub_nodes.len(), 2);
    assert_eq!(combined[0].count, Some(2));
    assert!(combined[1].sub_nodes.is_empty());
    assert_eq!(combined[1].count, None);
    assert_eq!(count_nodes(&combined), 4);
}

#[test]
fn test_id_conds_chunks() {
    let ids: Vec<i64> = (0..1001).collect();
    let conds = id_conds("bk_namespace_id", &ids);
    assert_eq!(conds.len(), 3);
    assert!(id_conds("bk_namespace_id", &[]).is_empty());
}
