//! TaskStore - generic persistent record store
//!
//! Records are stored as JSON bodies keyed by `(collection, id)`, with a
//! separate set of indexed fields that can be filtered without decoding the
//! body. Every write can carry an expectation about the stored
//! `updated_at`, which gives callers optimistic compare-and-swap semantics.
//!
//! # Backends
//!
//! - [`SqliteBackend`] - durable, safe across processes (SQLite transactions)
//! - [`MemoryBackend`] - in-process, for tests and single-process deployments
//!
//! Both implement [`TransactionalStore`]; [`Store`] layers typed access on top.
//!
//! # Example
//!
//! ```ignore
//! use taskstore::{Filter, Store};
//!
//! let mut store = Store::open(".taskstore")?;
//! store.create(task)?;
//! let pending: Vec<Task> = store.list(&[Filter::eq("status", "pending")])?;
//! store.close()?;
//! ```

mod backend;
mod record;
mod store;

pub use backend::{Expect, IndexedEntry, MemoryBackend, RecordWrite, SqliteBackend, StoredRecord, TransactionalStore};
pub use record::{Filter, FilterOp, IndexValue, Record, now_ms};
pub use store::Store;

/// File name of the SQLite database inside a store directory
pub const DB_FILE_NAME: &str = "taskstore.db";
