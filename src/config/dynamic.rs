//! Dynamic (runtime-readable) configuration.

use std::collections::HashMap;
use std::sync::RwLock;

/// Errors from dynamic configuration lookups.
#[derive(Debug, thiserror::Error)]
pub enum DynamicConfigError {
    #[error("dynamic config unavailable: {0}")]
    Unavailable(String),
}

/// Source of settings that may change while the process runs.
///
/// Callers must treat lookup errors as non-fatal and fall back to defaults.
pub trait DynamicConfig: Send + Sync {
    /// Current raw value of `key`, `None` if unset.
    fn get(&self, key: &str) -> Result<Option<String>, DynamicConfigError>;
}

/// In-process dynamic configuration, seeded from the config file and
/// updatable at runtime.
#[derive(Debug, Default)]
pub struct StaticDynamicConfig {
    values: RwLock<HashMap<String, String>>,
}

impl StaticDynamicConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: HashMap<String, String>) -> Self {
        Self {
            values: RwLock::new(values),
        }
    }

    /// Set or replace a value.
    pub fn set(&self, key: &str, value: &str) {
        if let Ok(mut values) = self.values.write() {
            values.insert(key.to_string(), value.to_string());
        }
    }
}

impl DynamicConfig for StaticDynamicConfig {
    fn get(&self, key: &str) -> Result<Option<String>, DynamicConfigError> {
        let values = self
            .values
            .read()
            .map_err(|e| DynamicConfigError::Unavailable(e.to_string()))?;
        Ok(values.get(key).cloned())
    }
}
