//! Shared storage integration tests.
//!
//! Tests the KvCache and TokenStore interfaces against all implementations.
//! Each implementation module imports these test functions and runs them.

pub mod cache_tests;
pub mod token_store_tests;
