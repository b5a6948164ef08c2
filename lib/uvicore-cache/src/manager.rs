use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::{CacheConfig, MEMORY_DRIVER, StoreConfig};
use crate::{Cache, CacheError, CacheStore, MemoryStore};

/// Resolves named stores from configuration. Each store is built on first
/// use and shared by every later `connect` for that name.
#[derive(Debug)]
pub struct CacheManager {
    config: CacheConfig,
    stores: Mutex<HashMap<String, Cache>>,
}

impl CacheManager {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            stores: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Handle for the named store, or the default store when `name` is `None`.
    pub fn connect(&self, name: Option<&str>) -> Result<Cache, CacheError> {
        let name = name.unwrap_or(&self.config.default);
        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cache) = stores.get(name) {
            return Ok(cache.clone());
        }
        let store = build_store(name, self.config.store(name)?)?;
        let cache = Cache::new(name, store);
        stores.insert(name.to_string(), cache.clone());
        tracing::debug!(store = name, "cache store connected");
        Ok(cache)
    }

    /// Handle for the default store.
    pub fn store(&self) -> Result<Cache, CacheError> {
        self.connect(None)
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

fn build_store(name: &str, config: &StoreConfig) -> Result<Arc<dyn CacheStore>, CacheError> {
    match config.driver.as_str() {
        MEMORY_DRIVER => {
            let mut store = MemoryStore::new();
            if let Some(ttl) = config.default_ttl() {
                store = store.with_default_ttl(ttl);
            }
            if let Some(max) = config.max_entries {
                store = store.with_max_entries(max);
            }
            Ok(Arc::new(store))
        }
        other => Err(CacheError::UnknownDriver {
            store: name.to_string(),
            driver: other.to_string(),
        }),
    }
}
