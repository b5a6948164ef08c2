//! PostgreSQL backend for uvicore-orm.
//!
//! [`PgPool`] implements the row-level executor traits and table DDL, so an
//! [`Orm`](uvicore_orm::Orm) can run on top of it directly.
//!
//! # Usage
//!
//! ```text
//! use uvicore_orm::{Connections, Orm, OrmConfig};
//! use uvicore_orm_postgres::PgPool;
//!
//! let config = OrmConfig::load(None)?;
//! let connections = Connections::<PgPool>::connect(&config).await?;
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

pub use executor::{PgPool, PgTransaction};

// Re-export core types for convenience
pub use uvicore_orm::{
    ConnectionConfig, DatabaseConnection, Delete, Filter, Insert, Order, OrmError, Query,
    QueryExecutor, StorageDatetime, TransactionExecutor, Update, Value,
};
