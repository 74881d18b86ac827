//! In-process backend

use std::collections::{BTreeMap, HashMap};

use eyre::Result;
use tracing::debug;

use super::{Expect, IndexedEntry, RecordWrite, StoredRecord, TransactionalStore};
use crate::record::{Filter, IndexValue};

#[derive(Debug, Clone)]
struct Row {
    data: String,
    updated_at: i64,
    index: HashMap<String, IndexValue>,
}

/// Records held in memory, ordered by `(collection, id)`
///
/// Bodies are kept serialized so reads hand out fresh copies, matching the
/// SQLite backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    rows: BTreeMap<(String, String), Row>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn matching<'a>(
        &'a self,
        collection: &'a str,
        filters: &'a [Filter],
    ) -> impl Iterator<Item = (&'a String, &'a Row)> + 'a {
        self.rows
            .iter()
            .filter(move |((c, _), _)| c == collection)
            .filter(move |(_, row)| filters.iter().all(|f| f.matches(&row.index)))
            .map(|((_, id), row)| (id, row))
    }
}

impl TransactionalStore for MemoryBackend {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, collection: &str, id: &str) -> Result<Option<StoredRecord>> {
        Ok(self
            .rows
            .get(&(collection.to_string(), id.to_string()))
            .map(|row| StoredRecord {
                id: id.to_string(),
                data: row.data.clone(),
                updated_at: row.updated_at,
            }))
    }

    fn scan(&self, collection: &str, filters: &[Filter]) -> Result<Vec<StoredRecord>> {
        Ok(self
            .matching(collection, filters)
            .map(|(id, row)| StoredRecord {
                id: id.clone(),
                data: row.data.clone(),
                updated_at: row.updated_at,
            })
            .collect())
    }

    fn scan_index(&self, collection: &str, filters: &[Filter]) -> Result<Vec<IndexedEntry>> {
        Ok(self
            .matching(collection, filters)
            .map(|(id, row)| IndexedEntry {
                id: id.clone(),
                updated_at: row.updated_at,
                fields: row.index.iter().map(|(k, v)| (k.clone(), v.normalized())).collect(),
            })
            .collect())
    }

    fn write(&mut self, write: RecordWrite, expect: Expect) -> Result<bool> {
        let key = (write.collection, write.id);
        let current = self.rows.get(&key).map(|row| row.updated_at);
        if !expect.holds(current) {
            debug!(id = %key.1, ?expect, ?current, "MemoryBackend::write: precondition failed");
            return Ok(false);
        }
        self.rows.insert(
            key,
            Row {
                data: write.data,
                updated_at: write.updated_at,
                index: write.index,
            },
        );
        Ok(true)
    }

    fn remove(&mut self, collection: &str, id: &str) -> Result<bool> {
        Ok(self.rows.remove(&(collection.to_string(), id.to_string())).is_some())
    }

    fn close(self: Box<Self>) -> Result<()> {
        debug!(rows = self.rows.len(), "MemoryBackend::close: dropping rows");
        Ok(())
    }
}
