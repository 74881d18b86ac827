//! CheckpointStore - point-in-time snapshots of worker state
//!
//! A worker periodically (or before risky operations) writes an immutable
//! checkpoint of its operational state. After a crash or detected drift the
//! latest good checkpoint is restored into live state, all-or-nothing.
//!
//! # Architecture
//!
//! ```text
//! <root>/
//! └── {owner_id}/
//!     ├── .lock                              # fs2 advisory lock, one writer per owner
//!     ├── routine-0001760000000000.json
//!     ├── pre_operation-0001760000005000.json
//!     └── recovery-0001760000009000.json
//! ```
//!
//! Writes go to a primary root and fall back to a secondary root when the
//! primary is unusable. Reads consult both.
//!
//! # Example
//!
//! ```ignore
//! use checkpointstore::{CheckpointKind, CheckpointManager, WorkerState};
//!
//! let manager = CheckpointManager::new("worker-1", &config)?;
//! let checkpoint = manager.create_checkpoint(CheckpointKind::Routine, &state)?;
//! manager.restore_checkpoint(&checkpoint, &mut state)?;
//! ```

pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod error;
pub mod manager;
mod store;

pub use checkpoint::{CHECKPOINT_VERSION, Checkpoint, CheckpointKind, CheckpointRef, WorkerState};
pub use config::{Config, RetentionPolicy};
pub use error::CheckpointError;
pub use manager::{CheckpointManager, DriftDetector, NeverDrift};
pub use store::{CheckpointDir, validate_owner_id};

/// Routine checkpoints kept per owner
pub const DEFAULT_KEEP_ROUTINE: usize = 3;

/// Age after which pre-operation and recovery checkpoints are pruned
pub const DEFAULT_MAX_AGE_DAYS: i64 = 7;
