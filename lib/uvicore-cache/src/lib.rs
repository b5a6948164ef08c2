//! # uvicore-cache
//!
//! Keyed cache with per-entry TTL and memoized lookups.
//!
//! ```
//! use std::time::Duration;
//! use uvicore_cache::{CacheError, CacheKey, CacheManager};
//!
//! # async fn example() -> Result<(), CacheError> {
//! let manager = CacheManager::default();
//! let cache = manager.store()?;
//!
//! let key = CacheKey::new("report").push(2024);
//! let total: u64 = cache
//!     .remember(&key, Some(Duration::from_secs(60)), || async {
//!         Ok::<_, CacheError>(42)
//!     })
//!     .await?;
//! assert_eq!(total, 42);
//! # Ok(())
//! # }
//! ```
//!
//! `remember` stores a value only once its producer has completed
//! successfully. Keys for values that depend on a secret input should carry a
//! [`CacheKey::fingerprint`] of that input.
#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)
)]

mod cache;
mod config;
mod error;
mod key;
mod manager;
mod memory;
mod store;

pub use cache::Cache;
pub use crate::config::{CacheConfig, ENV_PREFIX, MEMORY_DRIVER, StoreConfig};
pub use error::CacheError;
pub use key::CacheKey;
pub use manager::CacheManager;
pub use memory::MemoryStore;
pub use store::CacheStore;
