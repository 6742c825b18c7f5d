//! KvCache interface tests.
//!
//! These tests verify the contract of the KvCache trait. Every key is
//! namespaced under `prefix` so runs against a shared server do not collide.

use std::collections::BTreeSet;
use std::time::Duration;

use biztopo::interfaces::{CacheOp, KvCache};

const TTL: Duration = Duration::from_secs(60);

fn key(prefix: &str, name: &str) -> String {
    format!("{}:{}", prefix, name)
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

// =============================================================================
// Strings
// =============================================================================

pub async fn test_get_missing<C: KvCache>(cache: &C, prefix: &str) {
    let result = cache.get(&key(prefix, "missing")).await.expect("get should succeed");
    assert!(result.is_none(), "missing key should be None");
    assert!(!cache.exists(&key(prefix, "missing")).await.unwrap());
}

pub async fn test_set_get_del<C: KvCache>(cache: &C, prefix: &str) {
    let k = key(prefix, "blob");

    cache.set(&k, "{\"biz\":1}", TTL).await.expect("set should succeed");
    assert_eq!(cache.get(&k).await.unwrap().as_deref(), Some("{\"biz\":1}"));
    assert!(cache.exists(&k).await.unwrap());

    cache.del(&[k.clone()]).await.expect("del should succeed");
    assert!(cache.get(&k).await.unwrap().is_none());

    // Deleting nothing, or a missing key, is fine.
    cache.del(&[]).await.unwrap();
    cache.del(&[k]).await.unwrap();
}

pub async fn test_set_expires<C: KvCache>(cache: &C, prefix: &str) {
    let k = key(prefix, "short");

    cache.set(&k, "v", Duration::from_secs(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert!(cache.get(&k).await.unwrap().is_none(), "value should expire");
}

pub async fn test_mget_aligned<C: KvCache>(cache: &C, prefix: &str) {
    let a = key(prefix, "a");
    let b = key(prefix, "b");
    let c = key(prefix, "c");
    cache.set(&a, "1", TTL).await.unwrap();
    cache.set(&c, "3", TTL).await.unwrap();

    let values = cache.mget(&[a, b, c]).await.unwrap();

    assert_eq!(values, vec![Some("1".to_string()), None, Some("3".to_string())]);
    assert!(cache.mget(&[]).await.unwrap().is_empty());
}

// =============================================================================
// Sets
// =============================================================================

pub async fn test_set_members_scan<C: KvCache>(cache: &C, prefix: &str) {
    let k = key(prefix, "namespace:list");
    let members: Vec<String> = (1..=25).map(|i| i.to_string()).collect();

    cache.sadd(&k, &members).await.unwrap();
    cache.srem(&k, &strings(&["3", "4"])).await.unwrap();

    let mut seen = BTreeSet::new();
    let mut cursor = 0;
    loop {
        let (next, page) = cache.sscan(&k, cursor, 10).await.unwrap();
        seen.extend(page);
        if next == 0 {
            break;
        }
        cursor = next;
    }

    assert_eq!(seen.len(), 23);
    assert!(!seen.contains("3"));
    assert!(seen.contains("25"));
}

pub async fn test_expire_set<C: KvCache>(cache: &C, prefix: &str) {
    let k = key(prefix, "expiring:list");

    cache.sadd(&k, &strings(&["1"])).await.unwrap();
    cache.expire(&k, Duration::from_secs(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert!(!cache.exists(&k).await.unwrap(), "set should expire");
}

// =============================================================================
// Pipelines
// =============================================================================

pub async fn test_pipeline_applies_in_order<C: KvCache>(cache: &C, prefix: &str) {
    let list = key(prefix, "cluster:list");
    let detail = key(prefix, "cluster:10");
    let stale = key(prefix, "cluster:11");
    cache.set(&stale, "old", TTL).await.unwrap();

    cache
        .pipeline(vec![
            CacheOp::SAdd {
                key: list.clone(),
                members: strings(&["10", "11"]),
            },
            CacheOp::Set {
                key: detail.clone(),
                value: "{\"id\":10}".to_string(),
                ttl: TTL,
            },
            CacheOp::SRem {
                key: list.clone(),
                members: strings(&["11"]),
            },
            CacheOp::Del(vec![stale.clone()]),
            CacheOp::Expire {
                key: list.clone(),
                ttl: TTL,
            },
        ])
        .await
        .expect("pipeline should succeed");

    let (_, members) = cache.sscan(&list, 0, 100).await.unwrap();
    assert_eq!(members, strings(&["10"]));
    assert_eq!(cache.get(&detail).await.unwrap().as_deref(), Some("{\"id\":10}"));
    assert!(cache.get(&stale).await.unwrap().is_none());

    cache.pipeline(vec![]).await.expect("empty pipeline is a no-op");
}

/// Run every KvCache contract test.
#[macro_export]
macro_rules! run_cache_tests {
    ($cache:expr, $prefix:expr) => {
        storage::cache_tests::test_get_missing($cache, $prefix).await;
        println!("  test_get_missing: PASSED");

        storage::cache_tests::test_set_get_del($cache, $prefix).await;
        println!("  test_set_get_del: PASSED");

        storage::cache_tests::test_set_expires($cache, $prefix).await;
        println!("  test_set_expires: PASSED");

        storage::cache_tests::test_mget_aligned($cache, $prefix).await;
        println!("  test_mget_aligned: PASSED");

        storage::cache_tests::test_set_members_scan($cache, $prefix).await;
        println!("  test_set_members_scan: PASSED");

        storage::cache_tests::test_expire_set($cache, $prefix).await;
        println!("  test_expire_set: PASSED");

        storage::cache_tests::test_pipeline_applies_in_order($cache, $prefix).await;
        println!("  test_pipeline_applies_in_order: PASSED");
    };
}
