//! In-process store with per-entry TTL.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::{CacheError, CacheStore};

#[derive(Debug, Clone)]
struct Entry {
    value: JsonValue,
    expires_at: Option<Instant>,
    inserted: u64,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<String, Entry>,
    next_seq: u64,
}

/// Entries expire lazily: an expired entry is dropped when read, or when
/// room is needed under `max_entries`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<Entries>,
    default_ttl: Option<Duration>,
    max_entries: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// TTL applied when `put` is given none. Unset means entries never expire.
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Upper bound on stored entries.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    /// Number of stored entries, expired ones included until they are dropped.
    pub fn len(&self) -> usize {
        self.read().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Entries are replaced whole, so a poisoned lock still guards consistent data.
    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, key: &str) -> Option<JsonValue> {
        let now = Instant::now();
        {
            let entries = self.read();
            match entries.map.get(key) {
                None => return None,
                Some(entry) if entry.is_live(now) => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }
        let mut entries = self.write();
        // Re-check: a writer may have replaced the entry in between.
        if entries.map.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.map.remove(key);
            tracing::trace!(key, "cache entry expired");
        }
        None
    }
}

/// Make room for one new entry.
fn evict(entries: &mut Entries, max_entries: usize, now: Instant) {
    if entries.map.len() < max_entries {
        return;
    }
    entries.map.retain(|_, entry| entry.is_live(now));
    while entries.map.len() >= max_entries {
        // Entries with an expiry go first, soonest first, then oldest insertion
        let victim = entries
            .map
            .iter()
            .min_by_key(|(_, e)| (e.expires_at.is_none(), e.expires_at, e.inserted))
            .map(|(key, _)| key.clone());
        match victim {
            Some(key) => {
                tracing::debug!(key = %key, "cache entry evicted");
                entries.map.remove(&key);
            }
            None => break,
        }
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn has(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.lookup(key).is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<JsonValue>, CacheError> {
        Ok(self.lookup(key))
    }

    async fn put(
        &self,
        key: &str,
        value: JsonValue,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let now = Instant::now();
        let expires_at = ttl.or(self.default_ttl).map(|ttl| now + ttl);
        let mut entries = self.write();
        if let Some(max) = self.max_entries
            && !entries.map.contains_key(key)
        {
            evict(&mut entries, max, now);
        }
        let inserted = entries.next_seq;
        entries.next_seq += 1;
        entries.map.insert(
            key.to_string(),
            Entry {
                value,
                expires_at,
                inserted,
            },
        );
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.write().map.remove(key).is_some())
    }

    async fn flush(&self) -> Result<(), CacheError> {
        self.write().map.clear();
        Ok(())
    }
}
