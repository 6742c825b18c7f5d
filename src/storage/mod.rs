//! Storage implementations.

use std::sync::Arc;

use crate::interfaces::{ChangeStream, DocumentStore, KvCache, TokenStore};

pub mod mock;

#[cfg(feature = "redis")]
pub mod redis;

#[cfg(feature = "mongodb")]
pub mod mongodb;

pub use mock::{MockCache, MockChangeStream, MockDocumentStore, MockTokenStore};

#[cfg(feature = "redis")]
pub use redis::{RedisCache, RedisTokenStore};

#[cfg(feature = "mongodb")]
pub use mongodb::{MongoChangeStream, MongoDocumentStore};

/// Every backend the topology cache runs against.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn DocumentStore>,
    pub cache: Arc<dyn KvCache>,
    pub stream: Arc<dyn ChangeStream>,
    pub tokens: Arc<dyn TokenStore>,
}

#[cfg(feature = "standalone")]
impl Backends {
    /// In-memory backends for local development and tests.
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(MockDocumentStore::new()),
            cache: Arc::new(MockCache::new()),
            stream: Arc::new(MockChangeStream::new()),
            tokens: Arc::new(MockTokenStore::new()),
        }
    }
}

/// Connect to Redis and MongoDB, retrying with backoff while they come up.
#[cfg(all(feature = "redis", feature = "mongodb"))]
pub async fn connect(config: &crate::config::Config) -> Result<Backends, Box<dyn std::error::Error>> {
    use backon::Retryable;
    use tracing::{info, warn};

    use crate::utils::retry::connection_backoff;

    let conn = (|| async {
        let client = ::redis::Client::open(config.redis.url.as_str())?;
        ::redis::aio::ConnectionManager::new(client).await
    })
    .retry(connection_backoff())
    .notify(|e: &::redis::RedisError, delay: std::time::Duration| {
        warn!(error = %e, delay = ?delay, "Redis not ready, retrying");
    })
    .await?;
    info!(url = %config.redis.url, "Connected to Redis");

    let client = (|| async {
        let client = ::mongodb::Client::with_uri_str(&config.mongodb.uri).await?;
        client
            .database(&config.mongodb.database)
            .run_command(::mongodb::bson::doc! { "ping": 1 })
            .await?;
        Ok::<_, ::mongodb::error::Error>(client)
    })
    .retry(connection_backoff())
    .notify(|e: &::mongodb::error::Error, delay: std::time::Duration| {
        warn!(error = %e, delay = ?delay, "MongoDB not ready, retrying");
    })
    .await?;
    info!(database = %config.mongodb.database, "Connected to MongoDB");

    Ok(Backends {
        store: Arc::new(MongoDocumentStore::new(&client, &config.mongodb.database)),
        cache: Arc::new(RedisCache::from_connection(conn.clone())),
        stream: Arc::new(MongoChangeStream::new(&client, &config.mongodb.database)),
        tokens: Arc::new(RedisTokenStore::from_connection(
            conn,
            &config.redis.token_prefix,
        )),
    })
}
