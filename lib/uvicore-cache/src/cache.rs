use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::{CacheError, CacheStore};

/// Typed handle over a named store. Cheap to clone.
#[derive(Clone)]
pub struct Cache {
    name: String,
    store: Arc<dyn CacheStore>,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache").field("name", &self.name).finish()
    }
}

impl Cache {
    pub fn new(name: impl Into<String>, store: Arc<dyn CacheStore>) -> Self {
        Self {
            name: name.into(),
            store,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub async fn has(&self, key: impl AsRef<str>) -> Result<bool, CacheError> {
        self.store.has(key.as_ref()).await
    }

    pub async fn get(&self, key: impl AsRef<str>) -> Result<Option<JsonValue>, CacheError> {
        self.store.get(key.as_ref()).await
    }

    pub async fn put(
        &self,
        key: impl AsRef<str>,
        value: JsonValue,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.store.put(key.as_ref(), value, ttl).await
    }

    pub async fn forget(&self, key: impl AsRef<str>) -> Result<bool, CacheError> {
        self.store.forget(key.as_ref()).await
    }

    pub async fn flush(&self) -> Result<(), CacheError> {
        self.store.flush().await
    }

    /// Cached value decoded as `T`. A value that no longer decodes is a miss.
    pub async fn get_as<T: DeserializeOwned>(
        &self,
        key: impl AsRef<str>,
    ) -> Result<Option<T>, CacheError> {
        let key = key.as_ref();
        let Some(value) = self.store.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_value(value) {
            Ok(decoded) => Ok(Some(decoded)),
            Err(e) => {
                tracing::warn!(cache = %self.name, key, error = %e, "cached value does not decode, ignoring");
                Ok(None)
            }
        }
    }

    pub async fn put_as<T: Serialize>(
        &self,
        key: impl AsRef<str>,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let value = serde_json::to_value(value)?;
        self.store.put(key.as_ref(), value, ttl).await
    }

    /// The cached value for `key`, or the producer's result, stored for `ttl`.
    ///
    /// Producer errors propagate and nothing is stored. The value is only
    /// stored after the producer completes, so a producer dropped by a
    /// caller's timeout leaves the cache untouched.
    pub async fn remember<T, E, F, Fut>(
        &self,
        key: impl AsRef<str>,
        ttl: Option<Duration>,
        producer: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = key.as_ref();
        if let Some(hit) = self.get_as::<T>(key).await? {
            tracing::trace!(cache = %self.name, key, "cache hit");
            return Ok(hit);
        }
        let value = producer().await?;
        self.put_as(key, &value, ttl).await?;
        tracing::trace!(cache = %self.name, key, "cache stored");
        Ok(value)
    }

    /// Like [`Cache::remember`], for lookups that may find nothing.
    /// `Ok(None)` is returned as is and never stored.
    pub async fn remember_some<T, E, F, Fut>(
        &self,
        key: impl AsRef<str>,
        ttl: Option<Duration>,
        producer: F,
    ) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let key = key.as_ref();
        if let Some(hit) = self.get_as::<T>(key).await? {
            return Ok(Some(hit));
        }
        let Some(value) = producer().await? else {
            return Ok(None);
        };
        self.put_as(key, &value, ttl).await?;
        Ok(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{CacheKey, MemoryStore};

    fn cache() -> Cache {
        Cache::new("test", Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn remember_runs_producer_once() {
        let cache = cache();
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let value: u32 = cache
                .remember("answer", None, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, CacheError>(42)
                })
                .await
                .unwrap();
            assert_eq!(value, 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn producer_errors_are_not_cached() {
        let cache = cache();
        let result: Result<u32, CacheError> = cache
            .remember("k", None, || async {
                Err(CacheError::Store("backend down".to_string()))
            })
            .await;
        let err = result.unwrap_err();
        assert!(matches!(err, CacheError::Store(_)));
        assert!(!cache.has("k").await.unwrap());

        let value: u32 = cache
            .remember("k", None, || async { Ok::<_, CacheError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn negative_results_are_not_cached() {
        let cache = cache();
        let missing: Option<String> = cache
            .remember_some("user/nobody", None, || async { Ok::<_, CacheError>(None) })
            .await
            .unwrap();
        assert_eq!(missing, None);
        assert!(!cache.has("user/nobody").await.unwrap());

        let found: Option<String> = cache
            .remember_some("user/nobody", None, || async {
                Ok::<_, CacheError>(Some("late".to_string()))
            })
            .await
            .unwrap();
        assert_eq!(found.as_deref(), Some("late"));
        assert!(cache.has("user/nobody").await.unwrap());
    }

    #[tokio::test]
    async fn cancelled_producer_stores_nothing() {
        let cache = cache();
        let slow = cache.remember("slow", None, || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, CacheError>(1u32)
        });
        let timed_out = tokio::time::timeout(Duration::from_millis(20), slow).await;
        assert!(timed_out.is_err());
        assert!(!cache.has("slow").await.unwrap());
    }

    #[tokio::test]
    async fn different_fingerprints_never_share_a_result() {
        let cache = cache();
        let base = CacheKey::new("auth").push("user").push("alice");

        let first: String = cache
            .remember(base.clone().fingerprint("right"), None, || async {
                Ok::<_, CacheError>("verified with right".to_string())
            })
            .await
            .unwrap();
        let second: String = cache
            .remember(base.clone().fingerprint("wrong"), None, || async {
                Ok::<_, CacheError>("verified with wrong".to_string())
            })
            .await
            .unwrap();

        assert_eq!(first, "verified with right");
        assert_eq!(second, "verified with wrong");
    }

    #[tokio::test]
    async fn undecodable_values_read_as_misses() {
        let cache = cache();
        cache
            .put("k", serde_json::json!("text"), None)
            .await
            .unwrap();
        let decoded: Option<u32> = cache.get_as("k").await.unwrap();
        assert_eq!(decoded, None);

        cache.put_as("k", &5u32, None).await.unwrap();
        assert_eq!(cache.get_as::<u32>("k").await.unwrap(), Some(5));
        assert!(cache.forget("k").await.unwrap());
    }
}
