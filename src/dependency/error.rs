use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DependencyError {
    #[error("Project root does not exist: {0}")]
    RootMissing(PathBuf),

    #[error("Failed to walk {root}: {reason}")]
    Walk { root: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DependencyResult<T> = Result<T, DependencyError>;
