//! Redis KvCache implementation.

use std::time::Duration;

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use tracing::{debug, info};

use crate::interfaces::cache::{CacheOp, KvCache, Result};

/// Redis-backed topology cache.
///
/// Node details and blobs are plain strings with an expiry; node indexes are
/// sets. Pipelines are sent as a single non-transactional batch.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    /// Connect to Redis.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., redis://localhost:6379)
    pub async fn new(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;

        info!(url = %url, "Connected to Redis for topology cache");

        Ok(Self { conn })
    }

    /// Share an existing connection.
    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

/// Whole seconds for an expiry; Redis rejects a zero expiry.
fn expiry_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

fn add_op(pipe: &mut redis::Pipeline, op: CacheOp) {
    match op {
        CacheOp::Set { key, value, ttl } => {
            pipe.cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(expiry_secs(ttl))
                .ignore();
        }
        CacheOp::Del(keys) => {
            if !keys.is_empty() {
                pipe.cmd("DEL").arg(keys).ignore();
            }
        }
        CacheOp::SAdd { key, members } => {
            if !members.is_empty() {
                pipe.cmd("SADD").arg(key).arg(members).ignore();
            }
        }
        CacheOp::SRem { key, members } => {
            if !members.is_empty() {
                pipe.cmd("SREM").arg(key).arg(members).ignore();
            }
        }
        CacheOp::Expire { key, ttl } => {
            pipe.cmd("EXPIRE").arg(key).arg(expiry_secs(ttl)).ignore();
        }
    }
}

#[async_trait]
impl KvCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, expiry_secs(ttl)).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn del(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: () = conn.del(keys).await?;
        Ok(())
    }

    async fn sadd(&self, key: &str, members: &[String]) -> Result<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: () = conn.sadd(key, members).await?;
        Ok(())
    }

    async fn srem(&self, key: &str, members: &[String]) -> Result<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: () = conn.srem(key, members).await?;
        Ok(())
    }

    async fn sscan(&self, key: &str, cursor: u64, count: usize) -> Result<(u64, Vec<String>)> {
        let mut conn = self.conn.clone();
        let page: (u64, Vec<String>) = redis::cmd("SSCAN")
            .arg(key)
            .arg(cursor)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;
        Ok(page)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        // MGET through `cmd` so a single key still yields a list.
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await?;
        Ok(values)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("EXPIRE")
            .arg(key)
            .arg(expiry_secs(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn pipeline(&self, ops: Vec<CacheOp>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let count = ops.len();
        let mut pipe = redis::pipe();
        for op in ops {
            add_op(&mut pipe, op);
        }

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;

        debug!(ops = count, "Executed cache pipeline");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_secs_never_zero() {
        assert_eq!(expiry_secs(Duration::from_millis(10)), 1);
        assert_eq!(expiry_secs(Duration::from_secs(86_400)), 86_400);
    }

    #[test]
    fn test_empty_set_ops_are_dropped() {
        let mut pipe = redis::pipe();
        add_op(
            &mut pipe,
            CacheOp::SAdd {
                key: "k".to_string(),
                members: vec![],
            },
        );
        add_op(&mut pipe, CacheOp::Del(vec![]));
        assert!(pipe.cmd_iter().next().is_none());

        add_op(&mut pipe, CacheOp::Del(vec!["k".to_string()]));
        assert_eq!(pipe.cmd_iter().count(), 1);
    }
}
