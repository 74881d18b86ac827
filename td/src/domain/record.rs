//! TaskRecord - index-only projection of a ScheduledTask
//!
//! The recovery sweeps enumerate tasks by status; they only need a handful
//! of fields, all of which live in the store's index rows.

use taskstore::{IndexValue, IndexedEntry};

use super::task::TaskStatus;

/// Narrow view of a task used by the recovery sweeps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub task_id: String,
    pub owner_id: String,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Unix milliseconds
    pub updated_at: i64,
    pub correlation_id: Option<String>,
}

fn int_field(entry: &IndexedEntry, name: &str) -> Option<u32> {
    entry
        .fields
        .get(name)
        .and_then(IndexValue::as_int)
        .and_then(|v| u32::try_from(v).ok())
}

fn str_field<'a>(entry: &'a IndexedEntry, name: &str) -> Option<&'a str> {
    entry.fields.get(name).and_then(IndexValue::as_str)
}

impl TaskRecord {
    /// Build from index rows; `None` if a required field is missing or malformed
    pub fn from_entry(entry: &IndexedEntry) -> Option<Self> {
        let status = str_field(entry, "status")?.parse().ok()?;
        Some(Self {
            task_id: entry.id.clone(),
            owner_id: str_field(entry, "owner_id")?.to_string(),
            status,
            retry_count: int_field(entry, "retry_count")?,
            max_retries: int_field(entry, "max_retries")?,
            updated_at: entry.updated_at,
            correlation_id: str_field(entry, "correlation_id").map(str::to_string),
        })
    }

    /// Milliseconds since the last committed write
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.updated_at)
    }
}
