//! Topology cache configuration types.

use std::time::Duration;

use serde::Deserialize;

/// Default TTL of every topology cache entry (24 hours).
pub const DEFAULT_TTL_SECS: u64 = 24 * 60 * 60;

/// Topology cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TopoConfig {
    /// TTL applied to every cache entry, unless overridden per type.
    pub ttl_secs: u64,
    /// Brief topology overrides.
    pub brief: TopoTypeConfig,
    /// Kube topology overrides.
    pub kube: TopoTypeConfig,
    /// Change stream consumption.
    pub watch: WatchConfig,
    /// Refresh queue worker.
    pub queue: QueueConfig,
}

impl Default for TopoConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_TTL_SECS,
            brief: TopoTypeConfig::default(),
            kube: TopoTypeConfig::default(),
            watch: WatchConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

impl TopoConfig {
    /// Effective TTL for a topology type tag.
    pub fn ttl_for(&self, topo_type: &str) -> Duration {
        let override_secs = match topo_type {
            "brief" => self.brief.ttl_secs,
            "kube" => self.kube.ttl_secs,
            _ => None,
        };
        Duration::from_secs(override_secs.unwrap_or(self.ttl_secs))
    }
}

/// Per topology type overrides.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TopoTypeConfig {
    /// TTL override in seconds.
    pub ttl_secs: Option<u64>,
}

/// Change stream consumption settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Maximum events handled per batch.
    pub batch_size: usize,
    /// Retries of a failed batch before it is skipped.
    pub max_retries: usize,
    /// Delay between batch attempts, in milliseconds.
    pub retry_interval_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 200,
            max_retries: 10,
            retry_interval_ms: 1000,
        }
    }
}

impl WatchConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// Refresh queue worker settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Times a failed refresh is re-queued before it is dropped.
    pub max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}
