//! taskd - autonomous task orchestration
//!
//! Recurring tasks are registered with a cron rule, dispatched when due,
//! retried inline on transient failure, retried durably by a recovery
//! sweep, and escalated once their retry budget is spent. Workers snapshot
//! their live state to checkpoints and restore it after a crash or drift.
//!
//! # Modules
//!
//! - [`domain`] - ScheduledTask, statuses, recurrence rules and IDs
//! - [`state`] - actor owning the task store; optimistic CAS writes
//! - [`scheduler`] - tick loop, dispatch and the executor
//! - [`recovery`] - durable retry, escalation and stall detection
//! - [`retry`] - pure retry/escalate decisions and backoff
//! - [`events`] - TASK_COMMAND / TASK_FAILED / TASK_PERMANENTLY_FAILED
//! - [`worker`] - live worker state and its checkpoints
//! - [`daemon`] - wiring and lifecycle
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod actuator;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod domain;
pub mod error;
pub mod events;
pub mod recovery;
pub mod retry;
pub mod scheduler;
pub mod state;
pub mod worker;

// Re-export commonly used types
pub use actuator::{Actuator, ActuatorError, CommandActuator, NoopActuator};
pub use config::Config;
pub use daemon::Daemon;
pub use domain::{ScheduledTask, TaskRecord, TaskSpec, TaskStatus};
pub use error::TaskError;
pub use events::{EventBus, EventLogEntry, EventLogger, EventSink, TaskEvent, read_events, spawn_event_logger};
pub use recovery::{DriftCheck, RecoveryConfig, RecoveryCoordinator, SweepReport};
pub use retry::RetryDecision;
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerStats, TransitionCounters};
pub use state::{StateCommand, StateError, StateManager, StateResponse};
pub use worker::Worker;
