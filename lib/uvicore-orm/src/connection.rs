//! Named database connections and the backend connection contract.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::OrmConfig;
use crate::query::QueryExecutor;
use crate::registry::Registry;
use crate::schema::{Table, DEFAULT_CONNECTION};
use crate::OrmError;

/// Connection configuration for one database backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConnectionConfig {
    /// Database URL understood by the backend.
    pub url: String,
    /// Pool size; the backend picks one when unset.
    #[serde(default)]
    pub max_connections: Option<u32>,
}

impl From<&str> for ConnectionConfig {
    fn from(url: &str) -> Self {
        ConnectionConfig {
            url: url.to_string(),
            max_connections: None,
        }
    }
}

impl From<String> for ConnectionConfig {
    fn from(url: String) -> Self {
        ConnectionConfig {
            url,
            max_connections: None,
        }
    }
}

impl From<&String> for ConnectionConfig {
    fn from(url: &String) -> Self {
        ConnectionConfig::from(url.as_str())
    }
}

/// Trait for database connection and schema setup.
///
/// This trait abstracts the connection lifecycle, allowing different
/// backends (PostgreSQL, SQLite) to implement their own connection and
/// DDL logic.
#[async_trait]
pub trait DatabaseConnection: QueryExecutor + Sized {
    /// Connect to the database using the provided configuration.
    async fn connect(config: impl Into<ConnectionConfig> + Send) -> Result<Self, OrmError>;

    /// Create the given tables if they do not exist.
    async fn create_tables(&self, tables: &[Table]) -> Result<(), OrmError>;

    /// Drop the given tables if they exist.
    async fn drop_tables(&self, tables: &[Table]) -> Result<(), OrmError>;
}

/// Executors keyed by connection name.
#[derive(Debug, Clone)]
pub struct Connections<E> {
    executors: HashMap<String, E>,
    default: String,
}

impl<E> Connections<E> {
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            executors: HashMap::new(),
            default: default.into(),
        }
    }

    /// A single executor registered as the default connection.
    pub fn single(executor: E) -> Self {
        Self::new(DEFAULT_CONNECTION).with(DEFAULT_CONNECTION, executor)
    }

    pub fn with(mut self, name: impl Into<String>, executor: E) -> Self {
        self.executors.insert(name.into(), executor);
        self
    }

    pub fn get(&self, name: &str) -> Result<&E, OrmError> {
        self.executors
            .get(name)
            .ok_or_else(|| OrmError::UnknownConnection(name.to_string()))
    }

    pub fn default_executor(&self) -> Result<&E, OrmError> {
        self.get(&self.default)
    }

    pub fn default_name(&self) -> &str {
        &self.default
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.executors.keys().map(String::as_str)
    }
}

impl<E: DatabaseConnection> Connections<E> {
    /// Connect every configured connection.
    pub async fn connect(config: &OrmConfig) -> Result<Self, OrmError> {
        config.validate()?;
        let mut connections = Self::new(config.default.clone());
        for (name, connection) in &config.connections {
            let executor = E::connect(connection.clone()).await?;
            tracing::info!(connection = %name, "database connected");
            connections.executors.insert(name.clone(), executor);
        }
        Ok(connections)
    }

    /// Create every registered table on the connection it lives on.
    pub async fn create_tables(&self, registry: &Registry) -> Result<(), OrmError> {
        for (name, executor) in &self.executors {
            let tables: Vec<Table> = registry.tables_on(name).cloned().collect();
            executor.create_tables(&tables).await?;
        }
        Ok(())
    }

    pub async fn drop_tables(&self, registry: &Registry) -> Result<(), OrmError> {
        for (name, executor) in &self.executors {
            let tables: Vec<Table> = registry.tables_on(name).cloned().collect();
            executor.drop_tables(&tables).await?;
        }
        Ok(())
    }
}
