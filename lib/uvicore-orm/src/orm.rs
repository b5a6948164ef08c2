use std::sync::Arc;

use crate::config::BatchMode;
use crate::connection::Connections;
use crate::model::Model;
use crate::query::QueryExecutor;
use crate::registry::Registry;
use crate::select::QueryBuilder;
use crate::session::Session;
use crate::OrmError;

/// Entry point: the shared registry plus the connections statements run on.
///
/// Persistence operations live in `persist`, reads in [`QueryBuilder`].
pub struct Orm<E: QueryExecutor> {
    registry: Arc<Registry>,
    connections: Connections<E>,
    batch_mode: BatchMode,
}

impl<E: QueryExecutor + 'static> Orm<E> {
    pub fn new(registry: Arc<Registry>, connections: Connections<E>) -> Self {
        Self {
            registry,
            connections,
            batch_mode: BatchMode::default(),
        }
    }

    pub fn with_batch_mode(mut self, batch_mode: BatchMode) -> Self {
        self.batch_mode = batch_mode;
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn connections(&self) -> &Connections<E> {
        &self.connections
    }

    pub fn batch_mode(&self) -> BatchMode {
        self.batch_mode
    }

    /// Executor for the connection an entity lives on.
    pub fn executor_for(&self, entity: &str) -> Result<&E, OrmError> {
        let descriptor = self.registry.describe(entity)?;
        self.connections.get(descriptor.connection())
    }

    /// A unit of work honoring the configured batch mode.
    pub fn session(&self) -> Session<'_, E> {
        Session::new(&self.connections, self.batch_mode == BatchMode::Autocommit)
    }

    /// Start a read query for an entity.
    pub fn query(&self, entity: &str) -> QueryBuilder<'_, E> {
        QueryBuilder::new(self, entity)
    }

    /// Start a read query for a typed model's entity.
    pub fn query_model<T: Model>(&self) -> QueryBuilder<'_, E> {
        QueryBuilder::new(self, T::entity_name())
    }
}
