//! Storage configuration types.

use serde::Deserialize;

/// Redis-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
    /// Prefix for watch token keys.
    pub token_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            token_prefix: "cc:v3:watch_token".to_string(),
        }
    }
}

/// MongoDB-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MongodbConfig {
    /// MongoDB connection URI.
    pub uri: String,
    /// Database name.
    pub database: String,
}

impl Default for MongodbConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            database: "cmdb".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_config_default() {
        let mongodb = MongodbConfig::default();
        assert_eq!(mongodb.uri, "mongodb://localhost:27017");
        assert_eq!(mongodb.database, "cmdb");

        let redis = RedisConfig::default();
        assert_eq!(redis.token_prefix, "cc:v3:watch_token");
    }
}
