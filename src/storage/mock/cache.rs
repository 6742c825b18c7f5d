//! Mock KvCache implementation for testing.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::interfaces::cache::{CacheError, CacheOp, KvCache, Result};

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Mock cache that stores strings and sets in memory, honouring TTLs.
#[derive(Default)]
pub struct MockCache {
    entries: RwLock<HashMap<String, Entry>>,
    fail_on_read: RwLock<bool>,
    fail_on_write: RwLock<bool>,
    fail_on_blob_write: RwLock<Option<String>>,
}

impl MockCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_read(&self, fail: bool) {
        *self.fail_on_read.write().await = fail;
    }

    pub async fn set_fail_on_write(&self, fail: bool) {
        *self.fail_on_write.write().await = fail;
    }

    /// Fail plain `set` calls (not pipelines) for keys starting with `prefix`.
    pub async fn set_fail_on_set_prefix(&self, prefix: Option<&str>) {
        *self.fail_on_blob_write.write().await = prefix.map(str::to_string);
    }

    /// Live string value of a key, bypassing failure toggles.
    pub async fn raw_get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        match self.entries.read().await.get(key) {
            Some(Entry {
                value: Value::Str(s),
                expires_at,
            }) if expires_at.is_none_or(|at| at > now) => Some(s.clone()),
            _ => None,
        }
    }

    /// Live members of a set, sorted, bypassing failure toggles.
    pub async fn raw_members(&self, key: &str) -> Vec<String> {
        let now = Instant::now();
        match self.entries.read().await.get(key) {
            Some(entry) if entry.live(now) => match &entry.value {
                Value::Set(members) => members.iter().cloned().collect(),
                Value::Str(_) => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    /// Remaining TTL of a key.
    pub async fn raw_ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .read()
            .await
            .get(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// All live keys, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .read()
            .await
            .iter()
            .filter(|(_, e)| e.live(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    async fn check_read(&self) -> Result<()> {
        if *self.fail_on_read.read().await {
            return Err(CacheError::Connection("mock read failure".to_string()));
        }
        Ok(())
    }

    async fn check_write(&self) -> Result<()> {
        if *self.fail_on_write.read().await {
            return Err(CacheError::Connection("mock write failure".to_string()));
        }
        Ok(())
    }

    fn apply(entries: &mut HashMap<String, Entry>, op: CacheOp, now: Instant) {
        match op {
            CacheOp::Set { key, value, ttl } => {
                entries.insert(
                    key,
                    Entry {
                        value: Value::Str(value),
                        expires_at: Some(now + ttl),
                    },
                );
            }
            CacheOp::Del(keys) => {
                for key in keys {
                    entries.remove(&key);
                }
            }
            CacheOp::SAdd { key, members } => {
                let entry = entries
                    .entry(key)
                    .and_modify(|e| {
                        if !e.live(now) || !matches!(e.value, Value::Set(_)) {
                            e.value = Value::Set(BTreeSet::new());
                            e.expires_at = None;
                        }
                    })
                    .or_insert_with(|| Entry {
                        value: Value::Set(BTreeSet::new()),
                        expires_at: None,
                    });
                if let Value::Set(set) = &mut entry.value {
                    set.extend(members);
                }
            }
            CacheOp::SRem { key, members } => {
                let mut now_empty = false;
                if let Some(Entry {
                    value: Value::Set(set),
                    ..
                }) = entries.get_mut(&key)
                {
                    for m in &members {
                        set.remove(m);
                    }
                    now_empty = set.is_empty();
                }
                if now_empty {
                    entries.remove(&key);
                }
            }
            CacheOp::Expire { key, ttl } => {
                if let Some(entry) = entries.get_mut(&key) {
                    entry.expires_at = Some(now + ttl);
                }
            }
        }
    }
}

#[async_trait]
impl KvCache for MockCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_read().await?;
        Ok(self.raw_get(key).await)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.check_write().await?;
        if let Some(prefix) = self.fail_on_blob_write.read().await.as_deref() {
            if key.starts_with(prefix) {
                return Err(CacheError::Backend(format!("mock set failure for {}", key)));
            }
        }
        let op = CacheOp::Set {
            key: key.to_string(),
            value: value.to_string(),
            ttl,
        };
        Self::apply(&mut *self.entries.write().await, op, Instant::now());
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check_read().await?;
        let now = Instant::now();
        Ok(self
            .entries
            .read()
            .await
            .get(key)
            .is_some_and(|e| e.live(now)))
    }

    async fn del(&self, keys: &[String]) -> Result<()> {
        self.pipeline(vec![CacheOp::Del(keys.to_vec())]).await
    }

    async fn sadd(&self, key: &str, members: &[String]) -> Result<()> {
        self.pipeline(vec![CacheOp::SAdd {
            key: key.to_string(),
            members: members.to_vec(),
        }])
        .await
    }

    async fn srem(&self, key: &str, members: &[String]) -> Result<()> {
        self.pipeline(vec![CacheOp::SRem {
            key: key.to_string(),
            members: members.to_vec(),
        }])
        .await
    }

    async fn sscan(&self, key: &str, cursor: u64, count: usize) -> Result<(u64, Vec<String>)> {
        self.check_read().await?;
        let members = self.raw_members(key).await;
        let start = cursor as usize;
        if start >= members.len() {
            return Ok((0, Vec::new()));
        }
        let end = (start + count.max(1)).min(members.len());
        let next = if end >= members.len() { 0 } else { end as u64 };
        Ok((next, members[start..end].to_vec()))
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        self.check_read().await?;
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.raw_get(key).await);
        }
        Ok(values)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.pipeline(vec![CacheOp::Expire {
            key: key.to_string(),
            ttl,
        }])
        .await
    }

    async fn pipeline(&self, ops: Vec<CacheOp>) -> Result<()> {
        self.check_write().await?;
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        for op in ops {
            Self::apply(&mut entries, op, now);
        }
        Ok(())
    }
}
