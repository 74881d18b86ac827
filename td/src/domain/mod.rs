//! Domain types for taskd
//!
//! ScheduledTask is the only persisted record; TaskRecord is its index-only
//! projection. Recurrence rules and IDs live here too.

mod id;
mod recurrence;
mod record;
mod task;

pub use id::{generate_id, resolve_id};
pub use recurrence::{Recurrence, next_run, validate_rule};
pub use record::TaskRecord;
pub use task::{DEFAULT_MAX_RETRIES, DEFAULT_OWNER, ScheduledTask, TaskSpec, TaskStatus};

// Re-export taskstore types for convenience
pub use taskstore::{Filter, FilterOp, IndexValue, Record, Store};
