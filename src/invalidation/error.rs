use std::path::PathBuf;

use thiserror::Error;

use crate::cache::StoreError;

#[derive(Error, Debug)]
pub enum InvalidationError {
    /// A required collaborator is missing or misconfigured.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{path} is outside the project root {root}")]
    OutsideProject { path: PathBuf, root: PathBuf },

    #[error("Invalidation record {0} not found")]
    RecordNotFound(u64),

    #[error("Invalidation record {0} was already rolled back")]
    AlreadyRolledBack(u64),

    #[error("Cache store error: {0}")]
    Store(#[from] StoreError),
}

pub type InvalidationResult<T> = Result<T, InvalidationError>;
