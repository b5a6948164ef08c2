//! # uvicore-auth
//!
//! User lookup for authentication middleware, backed by the ORM and cache.
//!
//! ```no_run
//! use std::sync::Arc;
//! use uvicore_auth::{OrmUserProvider, PasswordVerifier, UserProvider, schema};
//! use uvicore_cache::CacheManager;
//! use uvicore_orm::{Connections, DatabaseConnection, Orm};
//! use uvicore_orm_sqlite::SqlitePool;
//!
//! struct Plain;
//!
//! impl PasswordVerifier for Plain {
//!     fn verify(&self, password: &str, hash: &str) -> bool {
//!         password == hash
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = SqlitePool::connect("sqlite://auth.db").await?;
//! let orm = Orm::new(Arc::new(schema::registry()?), Connections::single(pool));
//! let cache = CacheManager::default().store()?;
//! let provider = OrmUserProvider::new(Arc::new(orm), cache, Arc::new(Plain));
//!
//! if let Some(user) = provider.authenticate("admin", "secret").await? {
//!     println!("{} can admin: {}", user.username, user.can("admin"));
//! }
//! # Ok(())
//! # }
//! ```
#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)
)]

mod error;
mod provider;
pub mod schema;
mod user;

pub use error::AuthError;
pub use provider::{DEFAULT_INCLUDES, OrmUserProvider, PasswordVerifier, RetrieveOptions, UserProvider};
pub use user::{ADMIN_PERMISSION, UserInfo};
