//! Typed store over a [`TransactionalStore`] backend

use std::path::Path;

use eyre::{Context, Result, eyre};
use tracing::{debug, info};

use crate::backend::{Expect, IndexedEntry, MemoryBackend, RecordWrite, SqliteBackend, TransactionalStore};
use crate::record::{Filter, Record};

/// Typed record store
///
/// All mutation goes through `&mut self`; callers that need shared access
/// wrap the store in a single owning task (see the daemon's state manager).
pub struct Store {
    backend: Box<dyn TransactionalStore>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("backend", &self.backend.backend_name()).finish()
    }
}

fn encode<T: Record>(record: &T) -> Result<RecordWrite> {
    let data = serde_json::to_string(record).context("Failed to serialize record")?;
    Ok(RecordWrite {
        collection: T::collection_name().to_string(),
        id: record.id().to_string(),
        data,
        updated_at: record.updated_at(),
        index: record.indexed_fields(),
    })
}

fn decode<T: Record>(id: &str, data: &str) -> Result<T> {
    serde_json::from_str(data).context(format!("Failed to decode {} record {}", T::collection_name(), id))
}

impl Store {
    /// Open a durable store in `dir`, creating the directory if needed
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).context(format!("Failed to create store directory {}", dir.display()))?;
        let backend = SqliteBackend::open(dir.join(crate::DB_FILE_NAME))?;
        info!(dir = %dir.display(), "Opened store");
        Ok(Self::with_backend(Box::new(backend)))
    }

    /// Non-durable store for tests and embedded use
    pub fn in_memory() -> Self {
        Self::with_backend(Box::new(MemoryBackend::new()))
    }

    pub fn with_backend(backend: Box<dyn TransactionalStore>) -> Self {
        debug!(backend = backend.backend_name(), "Store::with_backend: called");
        Self { backend }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    /// Insert a new record; fails if the id already exists
    pub fn create<T: Record>(&mut self, record: T) -> Result<String> {
        let id = record.id().to_string();
        debug!(%id, collection = T::collection_name(), "Store::create: called");
        if !self.backend.write(encode(&record)?, Expect::Absent)? {
            return Err(eyre!("{} record {} already exists", T::collection_name(), id));
        }
        Ok(id)
    }

    pub fn get<T: Record>(&self, id: &str) -> Result<Option<T>> {
        debug!(%id, collection = T::collection_name(), "Store::get: called");
        self.backend
            .get(T::collection_name(), id)?
            .map(|stored| decode(&stored.id, &stored.data))
            .transpose()
    }

    /// Write `record` only if the stored version still has `expected_updated_at`
    ///
    /// Returns `false` when another writer got there first (or the record is gone).
    pub fn compare_and_swap<T: Record>(&mut self, record: T, expected_updated_at: i64) -> Result<bool> {
        debug!(
            id = %record.id(),
            expected_updated_at,
            new_updated_at = record.updated_at(),
            "Store::compare_and_swap: called"
        );
        self.backend.write(encode(&record)?, Expect::UpdatedAt(expected_updated_at))
    }

    /// Remove a record; returns whether it existed
    pub fn delete<T: Record>(&mut self, id: &str) -> Result<bool> {
        debug!(%id, collection = T::collection_name(), "Store::delete: called");
        self.backend.remove(T::collection_name(), id)
    }

    /// Decode all records matching every filter, ordered by id
    pub fn list<T: Record>(&self, filters: &[Filter]) -> Result<Vec<T>> {
        debug!(collection = T::collection_name(), filters = filters.len(), "Store::list: called");
        self.backend
            .scan(T::collection_name(), filters)?
            .iter()
            .map(|stored| decode(&stored.id, &stored.data))
            .collect()
    }

    /// Index-only listing; record bodies are not decoded
    pub fn list_indexed<T: Record>(&self, filters: &[Filter]) -> Result<Vec<IndexedEntry>> {
        debug!(collection = T::collection_name(), filters = filters.len(), "Store::list_indexed: called");
        self.backend.scan_index(T::collection_name(), filters)
    }

    /// Re-derive index rows from record bodies, e.g. after `indexed_fields` changed
    pub fn rebuild_indexes<T: Record>(&mut self) -> Result<usize> {
        debug!(collection = T::collection_name(), "Store::rebuild_indexes: called");
        let records: Vec<T> = self.list(&[])?;
        let mut count = 0;
        for record in records {
            let expected = record.updated_at();
            if self.backend.write(encode(&record)?, Expect::UpdatedAt(expected))? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Flush and release the backend
    pub fn close(self) -> Result<()> {
        debug!(backend = self.backend.backend_name(), "Store::close: called");
        self.backend.close()
    }
}
