//! Storage backends
//!
//! A backend owns raw JSON bodies plus their index rows and applies each
//! write atomically, honouring the caller's [`Expect`]ation about the
//! currently stored version.

use std::collections::HashMap;

use eyre::Result;

use crate::record::{Filter, IndexValue};

mod memory;
mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

/// A stored record body
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub id: String,
    pub data: String,
    pub updated_at: i64,
}

/// Index-only view of a record (body is not read)
#[derive(Debug, Clone)]
pub struct IndexedEntry {
    pub id: String,
    pub updated_at: i64,
    pub fields: HashMap<String, IndexValue>,
}

/// A single record write
#[derive(Debug, Clone)]
pub struct RecordWrite {
    pub collection: String,
    pub id: String,
    pub data: String,
    pub updated_at: i64,
    pub index: HashMap<String, IndexValue>,
}

/// Precondition for a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// The record must not exist yet
    Absent,
    /// Unconditional upsert
    Any,
    /// The stored record must have exactly this `updated_at`
    UpdatedAt(i64),
}

impl Expect {
    /// Check the precondition against the currently stored version
    pub fn holds(&self, current: Option<i64>) -> bool {
        match self {
            Self::Absent => current.is_none(),
            Self::Any => true,
            Self::UpdatedAt(expected) => current == Some(*expected),
        }
    }
}

/// Single-writer transactional storage
///
/// Implementations must make each `write` and `remove` atomic: readers see
/// either the previous or the new record with its index rows, never a mix.
pub trait TransactionalStore: Send {
    /// Short backend name for logging
    fn backend_name(&self) -> &'static str;

    fn get(&self, collection: &str, id: &str) -> Result<Option<StoredRecord>>;

    fn scan(&self, collection: &str, filters: &[Filter]) -> Result<Vec<StoredRecord>>;

    fn scan_index(&self, collection: &str, filters: &[Filter]) -> Result<Vec<IndexedEntry>>;

    /// Apply a write if `expect` holds; returns whether it was applied
    fn write(&mut self, write: RecordWrite, expect: Expect) -> Result<bool>;

    /// Remove a record and its index rows; returns whether it existed
    fn remove(&mut self, collection: &str, id: &str) -> Result<bool>;

    /// Flush and release resources
    fn close(self: Box<Self>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expect_holds() {
        assert!(Expect::Absent.holds(None));
        assert!(!Expect::Absent.holds(Some(1)));
        assert!(Expect::Any.holds(Some(1)));
        assert!(Expect::UpdatedAt(5).holds(Some(5)));
        assert!(!Expect::UpdatedAt(5).holds(Some(6)));
        assert!(!Expect::UpdatedAt(5).holds(None));
    }
}
