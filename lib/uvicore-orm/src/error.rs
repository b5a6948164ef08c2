use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrmError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("Unknown relation '{relation}' on entity '{entity}'")]
    UnknownRelation { entity: String, relation: String },

    #[error("Relation '{relation}' on entity '{entity}' is {kind}, which does not support {operation}")]
    InvalidRelationType {
        entity: String,
        relation: String,
        kind: &'static str,
        operation: &'static str,
    },

    #[error("Unknown connection: {0}")]
    UnknownConnection(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Insert of element {index} ({entity}) failed at '{path}' writing '{failed_entity}': {source}")]
    NestedInsert {
        index: usize,
        entity: String,
        path: String,
        /// Entity whose row could not be written; the root entity for root-level failures.
        failed_entity: String,
        #[source]
        source: Box<OrmError>,
    },
}

impl OrmError {
    /// Underlying error of a failed nested insert, or `self`.
    pub fn root_cause(&self) -> &OrmError {
        match self {
            OrmError::NestedInsert { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
