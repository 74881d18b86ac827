//! Scheduler for recurring tasks
//!
//! Evaluates recurrence rules on a fixed tick, dispatches due tasks in
//! priority order up to a concurrency ceiling, and runs each through the
//! [`Executor`] on its own tokio task.

mod config;
mod core;
mod executor;
mod stats;
mod writer;

pub use config::SchedulerConfig;
pub use core::Scheduler;
pub use executor::Executor;
pub use stats::{SchedulerStats, TransitionCounters};
pub use writer::TaskWriter;
