//! Task-level error taxonomy

use checkpointstore::CheckpointError;
use thiserror::Error;

use crate::state::StateError;

/// Errors surfaced by scheduling, execution and recovery
#[derive(Debug, Error)]
pub enum TaskError {
    /// Bad input; returned synchronously and never retried
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Task timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// The actuator reported a failure
    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Task not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

impl TaskError {
    /// Whether this error goes through the retry ladder
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Execution(_))
    }
}

impl From<StateError> for TaskError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::NotFound(id) => Self::NotFound(id),
            other => Self::Persistence(other.to_string()),
        }
    }
}
