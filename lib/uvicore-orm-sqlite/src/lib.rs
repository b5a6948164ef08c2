//! SQLite backend for uvicore-orm.
//!
//! [`SqlitePool`] implements the row-level executor traits and table DDL.
//! `SqlitePool::memory()` gives a private in-memory database, which is what
//! the integration tests run against.
//!
//! # Usage
//!
//! ```text
//! use uvicore_orm::{Connections, Orm};
//! use uvicore_orm_sqlite::SqlitePool;
//!
//! let pool = SqlitePool::memory().await?;
//! let connections = Connections::single(pool);
//! connections.create_tables(&registry).await?;
//! let orm = Orm::new(Arc::new(registry), connections);
//! ```

#![cfg_attr(
    test,
    allow(clippy::unwrap_used, clippy::expect_used, clippy::unwrap_in_result)
)]

mod bind;
mod ddl;
mod executor;

pub use executor::{SqlitePool, SqliteTransaction};

// Re-export core types for convenience
pub use uvicore_orm::{
    ConnectionConfig, DatabaseConnection, Delete, Filter, Insert, Order, OrmError, Query,
    QueryExecutor, StorageDatetime, TransactionExecutor, Update, Value,
};
