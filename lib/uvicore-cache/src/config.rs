use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::CacheError;

/// Environment variable prefix for overrides, e.g. `UVICORE__CACHE__DEFAULT`.
pub const ENV_PREFIX: &str = "UVICORE";

pub const MEMORY_DRIVER: &str = "memory";

/// One named store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_driver")]
    pub driver: String,
    /// TTL for entries stored without one. Unset keeps entries until evicted.
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
    #[serde(default)]
    pub max_entries: Option<usize>,
}

impl StoreConfig {
    pub fn memory() -> Self {
        Self {
            driver: default_driver(),
            ttl_seconds: None,
            max_entries: None,
        }
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        self.ttl_seconds.map(Duration::from_secs)
    }
}

fn default_driver() -> String {
    MEMORY_DRIVER.to_string()
}

/// The `cache` configuration section.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_store")]
    pub default: String,
    #[serde(default = "default_stores")]
    pub stores: HashMap<String, StoreConfig>,
}

fn default_store() -> String {
    MEMORY_DRIVER.to_string()
}

fn default_stores() -> HashMap<String, StoreConfig> {
    HashMap::from([(default_store(), StoreConfig::memory())])
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default: default_store(),
            stores: default_stores(),
        }
    }
}

impl CacheConfig {
    /// Load the `cache` section from an optional TOML file, then
    /// `UVICORE__CACHE__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, CacheError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .separator("__"),
            )
            .build()?;

        let config = match settings.get::<CacheConfig>("cache") {
            Ok(config) => config,
            Err(config::ConfigError::NotFound(_)) => CacheConfig::default(),
            Err(e) => return Err(e.into()),
        };
        config.store(&config.default)?;
        tracing::debug!(
            default = %config.default,
            stores = config.stores.len(),
            "cache configuration loaded"
        );
        Ok(config)
    }

    pub fn store(&self, name: &str) -> Result<&StoreConfig, CacheError> {
        self.stores
            .get(name)
            .ok_or_else(|| CacheError::UnknownStore(name.to_string()))
    }
}
