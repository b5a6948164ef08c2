use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::CacheError;

/// Backing store for cached values.
///
/// Values are replaced whole, never mutated in place. Concurrent writers to
/// one key race; the last write wins.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Whether a live (unexpired) entry exists for `key`.
    async fn has(&self, key: &str) -> Result<bool, CacheError>;

    /// The live value for `key`, or `None` on a miss.
    async fn get(&self, key: &str) -> Result<Option<JsonValue>, CacheError>;

    /// Store `value` under `key`. `ttl` of `None` uses the store's default.
    async fn put(&self, key: &str, value: JsonValue, ttl: Option<Duration>)
    -> Result<(), CacheError>;

    /// Remove `key`. Returns whether an entry was removed.
    async fn forget(&self, key: &str) -> Result<bool, CacheError>;

    /// Remove every entry.
    async fn flush(&self) -> Result<(), CacheError>;
}
