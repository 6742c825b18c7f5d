//! TokenStore interface tests.

use biztopo::interfaces::{TokenStore, WatchToken};
use chrono::{TimeZone, Utc};

pub async fn test_get_never_stored<S: TokenStore>(store: &S) {
    let result = store
        .get("biz_topo:never_stored")
        .await
        .expect("get should succeed");
    assert!(result.is_none(), "unknown watch should have no token");
}

pub async fn test_put_replaces<S: TokenStore>(store: &S) {
    let name = "biz_topo:cc_KubeNamespace";
    let first = WatchToken {
        token: Some("{\"_data\":\"01\"}".to_string()),
        start_at: Some(Utc.timestamp_opt(1_700_000_000, 0).unwrap()),
    };
    let reset = WatchToken {
        token: None,
        start_at: Some(Utc.timestamp_opt(1_700_000_600, 0).unwrap()),
    };

    store.put(name, &first).await.expect("put should succeed");
    assert_eq!(store.get(name).await.unwrap(), Some(first));

    store.put(name, &reset).await.unwrap();
    assert_eq!(store.get(name).await.unwrap(), Some(reset));
}

pub async fn test_watch_isolation<S: TokenStore>(store: &S) {
    let pods = WatchToken {
        token: Some("pods".to_string()),
        start_at: None,
    };
    store.put("biz_topo:cc_KubePod", &pods).await.unwrap();

    assert!(store.get("biz_topo:cc_KubeCluster").await.unwrap().is_none());
    assert_eq!(store.get("biz_topo:cc_KubePod").await.unwrap(), Some(pods));
}

/// Run every TokenStore contract test.
#[macro_export]
macro_rules! run_token_store_tests {
    ($store:expr) => {
        storage::token_store_tests::test_get_never_stored($store).await;
        println!("  test_get_never_stored: PASSED");

        storage::token_store_tests::test_put_replaces($store).await;
        println!("  test_put_replaces: PASSED");

        storage::token_store_tests::test_watch_isolation($store).await;
        println!("  test_watch_isolation: PASSED");
    };
}
