//! Checkpoint errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Artifact could not be written, read or deleted
    #[error("Checkpoint persistence failed: {0}")]
    Persistence(String),

    /// Artifact is unusable for this owner; live state untouched
    #[error("Checkpoint restore failed: {0}")]
    Restore(String),

    /// Owner id is not a plain directory name
    #[error("Invalid checkpoint owner id '{0}'")]
    InvalidOwner(String),

    #[error("Checkpoint not found: {0}")]
    NotFound(String),
}

impl From<std::io::Error> for CheckpointError {
    fn from(e: std::io::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}
