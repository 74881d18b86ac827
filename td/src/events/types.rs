//! Event types published to the event sink
//!
//! These are the outcomes other components (workers, operators) react to:
//! - `TASK_COMMAND`: a durable retry, addressed to the owning worker
//! - `TASK_FAILED`: a failure that will still be retried
//! - `TASK_PERMANENTLY_FAILED`: retries exhausted, needs a human

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ScheduledTask;

/// Core event enum
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskEvent {
    /// Full task payload for the owning worker to act on
    TaskCommand {
        target_owner: String,
        correlation_id: String,
        task: Box<ScheduledTask>,
    },
    TaskFailed {
        task_id: String,
        reason: String,
        retry_count: u32,
    },
    TaskPermanentlyFailed {
        task_id: String,
        reason: String,
        total_retries: u32,
    },
}

impl TaskEvent {
    /// Build a TASK_COMMAND for a task that is about to be retried
    pub fn command(task: &ScheduledTask) -> Self {
        Self::TaskCommand {
            target_owner: task.owner_id.clone(),
            correlation_id: task.correlation_id.clone().unwrap_or_default(),
            task: Box::new(task.clone()),
        }
    }

    /// Wire name of the event type
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TaskCommand { .. } => "TASK_COMMAND",
            Self::TaskFailed { .. } => "TASK_FAILED",
            Self::TaskPermanentlyFailed { .. } => "TASK_PERMANENTLY_FAILED",
        }
    }

    pub fn task_id(&self) -> &str {
        match self {
            Self::TaskCommand { task, .. } => &task.id,
            Self::TaskFailed { task_id, .. } | Self::TaskPermanentlyFailed { task_id, .. } => task_id,
        }
    }
}

/// Timestamped event for the JSONL log
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventLogEntry {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub event: TaskEvent,
}

impl EventLogEntry {
    pub fn new(event: TaskEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}
