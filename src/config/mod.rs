//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod dynamic;
mod storage;
mod topo;

pub use dynamic::{DynamicConfig, DynamicConfigError, StaticDynamicConfig};
pub use storage::{MongodbConfig, RedisConfig};
pub use topo::{QueueConfig, TopoConfig, TopoTypeConfig, WatchConfig};

use std::collections::HashMap;

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "BIZTOPO_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "BIZTOPO";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "BIZTOPO_LOG";
/// Tenant used when none is configured.
pub const DEFAULT_TENANT: &str = "default";

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tenants whose businesses are swept and watched.
    pub tenants: Vec<String>,
    /// Redis (key-value cache) configuration.
    pub redis: RedisConfig,
    /// MongoDB (document store and change streams) configuration.
    pub mongodb: MongodbConfig,
    /// Topology cache configuration.
    pub topo: TopoConfig,
    /// Dynamic settings readable at runtime (e.g. refresh intervals).
    pub dynamic: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tenants: vec![DEFAULT_TENANT.to_string()],
            redis: RedisConfig::default(),
            mongodb: MongodbConfig::default(),
            topo: TopoConfig::default(),
            dynamic: HashMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config.normalized())
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config.normalized())
    }

    /// Dynamic configuration backed by the `dynamic` section.
    pub fn dynamic_config(&self) -> StaticDynamicConfig {
        StaticDynamicConfig::from_map(self.dynamic.clone())
    }

    fn normalized(mut self) -> Self {
        if self.tenants.is_empty() {
            self.tenants.push(DEFAULT_TENANT.to_string());
        }
        self
    }
}
