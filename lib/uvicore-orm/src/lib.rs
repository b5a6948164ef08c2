//! Uvicore ORM - relation-aware persistence over named SQL connections.
//!
//! Entities are declared once into an immutable [`Registry`]; the [`Orm`]
//! then persists nested request graphs in foreign-key order and reads rows
//! back with eager-loaded relations.
//!
//! # Core Concepts
//!
//! - **Entity**: a table plus typed fields and relation declarations.
//! - **Relation**: one of `BelongsTo`, `HasOne`, `HasMany`, `ManyToMany`,
//!   `MorphOne`, `MorphMany`, `MorphToMany`, resolved to concrete keys and
//!   pivot tables when the registry is built.
//! - **Request**: a JSON object of column values and relation keys. Relation
//!   values may reference existing rows by primary key or describe new rows,
//!   nested to any depth.
//!
//! # Traits
//!
//! - [`QueryExecutor`] / [`TransactionExecutor`]: implemented by backends
//! - [`DatabaseConnection`]: backend connect and table DDL
//! - [`Model`]: typed structs bound to an entity (`#[derive(Model)]`)

#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::unwrap_in_result,
        clippy::panic
    )
)]

use std::future::Future;
use std::pin::Pin;

mod config;
mod connection;
mod entity;
mod error;
mod input;
mod model;
mod orm;
mod persist;
mod query;
mod record;
mod registry;
mod relation;
mod schema;
mod select;
mod session;
mod time;

#[cfg(test)]
mod testing;

pub use crate::config::{BatchMode, ENV_PREFIX, OrmConfig};
pub use connection::{ConnectionConfig, Connections, DatabaseConnection};
pub use entity::{EntityDef, EntityDescriptor, Field, WriteOnly};
pub use error::OrmError;
pub use input::{Graph, Input, RelationInput};
pub use model::Model;
pub use orm::Orm;
pub use query::{
    Assignment, Delete, Filter, Insert, Join, Order, Query, QueryExecutor, SelectColumn,
    TransactionExecutor, Update, Value, split_path,
};
pub use record::{Entity, Related, Row};
pub use registry::{Registry, RegistryBuilder};
pub use relation::{
    KeyedRelation, MorphPivot, MorphPivotRelation, MorphRelation, Pivot, PivotRelation,
    RelationDecl, RelationKind, RelationSpec,
};
pub use schema::{Column, DEFAULT_CONNECTION, FieldType, Table};
pub use select::QueryBuilder;
pub use session::Session;
pub use time::StorageDatetime;

// Re-export derive macro
pub use uvicore_orm_derive::Model;

/// Boxed future used where persistence and loading recurse.
pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
