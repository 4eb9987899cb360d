use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to persist entry {key}: {reason}")]
    Persist { key: String, reason: String },

    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    #[error("Path {path} is not under project root {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },
}

pub type StoreResult<T> = Result<T, StoreError>;
