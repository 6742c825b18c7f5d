//! Redis TokenStore implementation.
//!
//! Stores each watch's resume position as a JSON string.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use tracing::{debug, info};

use crate::interfaces::change_stream::{Result, TokenStore, WatchToken};

/// Redis implementation of TokenStore.
///
/// Key format: `{prefix}:{watch_name}`
pub struct RedisTokenStore {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisTokenStore {
    /// Create a new Redis token store.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., redis://localhost:6379)
    /// * `key_prefix` - Prefix for token keys
    pub async fn new(url: &str, key_prefix: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;

        info!(url = %url, "Connected to Redis for watch tokens");

        Ok(Self::from_connection(conn, key_prefix))
    }

    /// Share an existing connection.
    pub fn from_connection(conn: ConnectionManager, key_prefix: &str) -> Self {
        Self {
            conn,
            key_prefix: key_prefix.to_string(),
        }
    }

    fn token_key(&self, name: &str) -> String {
        format!("{}:{}", self.key_prefix, name)
    }
}

#[async_trait]
impl TokenStore for RedisTokenStore {
    async fn get(&self, name: &str) -> Result<Option<WatchToken>> {
        let key = self.token_key(name);
        let mut conn = self.conn.clone();

        let value: Option<String> = conn.get(&key).await?;
        match value {
            Some(json) => {
                let token: WatchToken = serde_json::from_str(&json)?;
                debug!(watch = %name, "Retrieved watch token from Redis");
                Ok(Some(token))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, name: &str, token: &WatchToken) -> Result<()> {
        let key = self.token_key(name);
        let json = serde_json::to_string(token)?;
        let mut conn = self.conn.clone();

        let _: () = conn.set(&key, json).await?;

        debug!(watch = %name, "Stored watch token in Redis");
        Ok(())
    }
}
