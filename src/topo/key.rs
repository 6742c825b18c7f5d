//! Cache key layout and per-type cache policy.
//!
//! Every topology type owns one namespace (`cc:v3:biz_topo:<type>`), so keys
//! of different types never collide:
//!
//! ```text
//! <ns>:<tenant>:<biz>                      serialized full tree
//! <ns>:<tenant>:<biz>:<kind>:list          set of node ids
//! <ns>:<tenant>:<biz>:<kind>:<id>          node detail
//! <ns>:<tenant>:<biz>:<kind>:<id>:count    rollup count
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use super::error::{Result, TopoError};
use super::types::TopoType;
use crate::config::{DynamicConfig, TopoConfig};

/// Prefix shared by every topology namespace.
pub const NAMESPACE_PREFIX: &str = "cc:v3:biz_topo";

/// Refresh interval used when the dynamic value is absent or invalid.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Smallest refresh interval accepted from dynamic configuration.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(2 * 60);

/// Cache naming and policy for one topology type.
///
/// Immutable once built; one instance per type lives in the `KeyRegistry`.
pub struct Key {
    topo_type: TopoType,
    namespace: String,
    ttl: Duration,
    dynamic: Arc<dyn DynamicConfig>,
}

impl Key {
    pub fn new(topo_type: TopoType, ttl: Duration, dynamic: Arc<dyn DynamicConfig>) -> Self {
        Self {
            topo_type,
            namespace: format!("{}:{}", NAMESPACE_PREFIX, topo_type),
            ttl,
            dynamic,
        }
    }

    pub fn topo_type(&self) -> TopoType {
        self.topo_type
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// TTL of every entry in this namespace.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Key of the serialized full tree of a business.
    pub fn biz_topo_key(&self, tenant: &str, biz_id: i64) -> String {
        format!("{}:{}:{}", self.namespace, tenant, biz_id)
    }

    /// Key of the id index of one node kind of a business.
    pub fn node_list_key(&self, tenant: &str, biz_id: i64, kind: &str) -> String {
        format!("{}:{}:list", self.biz_topo_key(tenant, biz_id), kind)
    }

    /// Key of one node's detail.
    pub fn node_key(&self, tenant: &str, biz_id: i64, kind: &str, id: i64) -> String {
        format!("{}:{}:{}", self.biz_topo_key(tenant, biz_id), kind, id)
    }

    /// Key of one node's rollup count.
    pub fn node_count_key(&self, tenant: &str, biz_id: i64, kind: &str, id: i64) -> String {
        format!("{}:count", self.node_key(tenant, biz_id, kind, id))
    }

    /// Dynamic configuration key holding the refresh interval in minutes.
    pub fn refresh_interval_config_key(&self) -> String {
        format!("topo.{}.refresh_interval_minutes", self.topo_type)
    }

    /// Interval between full sweeps of this topology type.
    ///
    /// Never fails and never returns less than `MIN_REFRESH_INTERVAL`.
    pub fn refresh_interval(&self) -> Duration {
        let config_key = self.refresh_interval_config_key();
        let raw = match self.dynamic.get(&config_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                warn!(key = %config_key, default = ?DEFAULT_REFRESH_INTERVAL,
                    "Refresh interval not configured, using default");
                return DEFAULT_REFRESH_INTERVAL;
            }
            Err(e) => {
                warn!(key = %config_key, error = %e, "Refresh interval lookup failed, using default");
                return DEFAULT_REFRESH_INTERVAL;
            }
        };

        let interval = raw
            .trim()
            .parse::<u64>()
            .ok()
            .and_then(|minutes| minutes.checked_mul(60))
            .map(Duration::from_secs);

        match interval {
            Some(interval) if interval >= MIN_REFRESH_INTERVAL => interval,
            _ => {
                warn!(
                    key = %config_key,
                    value = %raw,
                    default_minutes = DEFAULT_REFRESH_INTERVAL.as_secs() / 60,
                    "Invalid refresh interval, using default"
                );
                DEFAULT_REFRESH_INTERVAL
            }
        }
    }
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Key")
            .field("topo_type", &self.topo_type)
            .field("namespace", &self.namespace)
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// Keys of every supported topology type, built once at startup.
#[derive(Debug, Default)]
pub struct KeyRegistry {
    keys: HashMap<TopoType, Arc<Key>>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a key for every topology type.
    pub fn from_config(config: &TopoConfig, dynamic: Arc<dyn DynamicConfig>) -> Self {
        let mut registry = Self::new();
        for topo_type in TopoType::ALL {
            registry.register(Key::new(
                topo_type,
                config.ttl_for(topo_type.as_str()),
                dynamic.clone(),
            ));
        }
        registry
    }

    pub fn register(&mut self, key: Key) {
        self.keys.insert(key.topo_type(), Arc::new(key));
    }

    pub fn get(&self, topo_type: TopoType) -> Result<Arc<Key>> {
        self.keys
            .get(&topo_type)
            .cloned()
            .ok_or_else(|| TopoError::InvalidTopoType(topo_type.to_string()))
    }

    /// Registered types, in a stable order.
    pub fn types(&self) -> Vec<TopoType> {
        let mut types: Vec<TopoType> = self.keys.keys().copied().collect();
        types.sort();
        types
    }
}
