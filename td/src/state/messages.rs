//! State manager messages
//!
//! Commands and responses for the actor pattern.

use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::{Filter, ScheduledTask, TaskRecord};

/// Errors from state operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Compare-and-swap kept losing to other writers
    #[error("Write conflict on {0}")]
    Conflict(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Channel error")]
    ChannelError,
}

/// Response from state operations
pub type StateResponse<T> = Result<T, StateError>;

/// Commands sent to the StateManager actor
#[derive(Debug)]
pub enum StateCommand {
    CreateTask {
        task: ScheduledTask,
        reply: oneshot::Sender<StateResponse<String>>,
    },
    GetTask {
        id: String,
        reply: oneshot::Sender<StateResponse<Option<ScheduledTask>>>,
    },
    /// Write `task` only if the stored `updated_at` equals `expected_updated_at`
    CompareAndSwap {
        task: ScheduledTask,
        expected_updated_at: i64,
        reply: oneshot::Sender<StateResponse<bool>>,
    },
    ListTasks {
        filters: Vec<Filter>,
        reply: oneshot::Sender<StateResponse<Vec<ScheduledTask>>>,
    },
    /// Index-only listing; bodies are not decoded
    ListRecords {
        filters: Vec<Filter>,
        reply: oneshot::Sender<StateResponse<Vec<TaskRecord>>>,
    },
    DeleteTask {
        id: String,
        reply: oneshot::Sender<StateResponse<bool>>,
    },
    RebuildIndexes {
        reply: oneshot::Sender<StateResponse<usize>>,
    },
    /// Close the store and stop the actor
    Shutdown {
        reply: oneshot::Sender<StateResponse<()>>,
    },
}
