//! Mock TokenStore implementation for testing.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::interfaces::change_stream::{Result, StreamError, TokenStore, WatchToken};

/// Mock token store that keeps watch positions in memory.
#[derive(Default)]
pub struct MockTokenStore {
    tokens: RwLock<HashMap<String, WatchToken>>,
    fail_on_put: RwLock<bool>,
}

impl MockTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_put(&self, fail: bool) {
        *self.fail_on_put.write().await = fail;
    }
}

#[async_trait]
impl TokenStore for MockTokenStore {
    async fn get(&self, name: &str) -> Result<Option<WatchToken>> {
        Ok(self.tokens.read().await.get(name).cloned())
    }

    async fn put(&self, name: &str, token: &WatchToken) -> Result<()> {
        if *self.fail_on_put.read().await {
            return Err(StreamError::TokenStore("mock put failure".to_string()));
        }
        self.tokens
            .write()
            .await
            .insert(name.to_string(), token.clone());
        Ok(())
    }
}
