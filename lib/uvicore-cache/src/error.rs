use thiserror::Error;

/// Errors from cache stores, the manager and typed cache access.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache store '{0}' is not configured")]
    UnknownStore(String),

    #[error("Cache store '{store}' uses unknown driver '{driver}'")]
    UnknownDriver { store: String, driver: String },

    #[error("Cache store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}
