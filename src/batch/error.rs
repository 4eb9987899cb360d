use std::path::PathBuf;

use thiserror::Error;

use crate::invalidation::InvalidationError;

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Batch processor has been shut down")]
    ShutDown,

    #[error("Invalidation failed for {path}: {source}")]
    Change {
        path: PathBuf,
        #[source]
        source: InvalidationError,
    },

    #[error("Eviction failed for {path}: {message}")]
    Eviction { path: PathBuf, message: String },
}

pub type BatchResult<T> = Result<T, BatchError>;
