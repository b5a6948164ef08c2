use thiserror::Error;
use uvicore_cache::CacheError;
use uvicore_orm::OrmError;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Unknown user: {0}")]
    UnknownUser(String),

    #[error(transparent)]
    Orm(#[from] OrmError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
