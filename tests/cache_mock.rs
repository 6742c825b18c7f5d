//! In-memory storage contract tests.
//!
//! The mocks back the standalone profile and every unit test, so they must
//! honour the same contract as the production backends.

mod storage;

use biztopo::storage::mock::{MockCache, MockTokenStore};

#[tokio::test]
async fn test_mock_cache() {
    let cache = MockCache::new();

    run_cache_tests!(&cache, "test_mock");
}

#[tokio::test]
async fn test_mock_token_store() {
    let store = MockTokenStore::new();

    run_token_store_tests!(&store);
}
