//! SQLite backend
//!
//! Bodies live in `records`, index rows in `record_index`. Writes run inside
//! an IMMEDIATE transaction so the version check and the write are atomic
//! across processes sharing the database file.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use eyre::{Context, Result};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params, params_from_iter};
use tracing::debug;

use super::{Expect, IndexedEntry, RecordWrite, StoredRecord, TransactionalStore};
use crate::record::{Filter, IndexValue};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS records (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    data TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (collection, id)
);
CREATE TABLE IF NOT EXISTS record_index (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    field TEXT NOT NULL,
    value,
    PRIMARY KEY (collection, id, field)
);
CREATE INDEX IF NOT EXISTS idx_record_index_field ON record_index (collection, field, value);
";

/// Busy timeout for cross-process lock contention
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed store
pub struct SqliteBackend {
    conn: Connection,
}

fn to_sql(value: &IndexValue) -> Value {
    match value.normalized() {
        IndexValue::String(s) => Value::Text(s),
        IndexValue::Int(i) => Value::Integer(i),
        IndexValue::Bool(b) => Value::Integer(i64::from(b)),
    }
}

fn from_sql(value: Value) -> Option<IndexValue> {
    match value {
        Value::Text(s) => Some(IndexValue::String(s)),
        Value::Integer(i) => Some(IndexValue::Int(i)),
        _ => None,
    }
}

/// Build the WHERE clause for a collection plus filters
fn where_clause(collection: &str, filters: &[Filter]) -> (String, Vec<Value>) {
    let mut sql = String::from("r.collection = ?");
    let mut params = vec![Value::Text(collection.to_string())];
    for filter in filters {
        sql.push_str(&format!(
            " AND EXISTS (SELECT 1 FROM record_index i2 WHERE i2.collection = r.collection \
             AND i2.id = r.id AND i2.field = ? AND i2.value {} ?)",
            filter.op.sql()
        ));
        params.push(Value::Text(filter.field.clone()));
        params.push(to_sql(&filter.value));
    }
    (sql, params)
}

impl SqliteBackend {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "SqliteBackend::open: called");
        let conn = Connection::open(path).context(format!("Failed to open database {}", path.display()))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(%mode, "SqliteBackend::open: journal mode set");
        conn.execute_batch(SCHEMA).context("Failed to create schema")?;
        Ok(Self { conn })
    }
}

impl TransactionalStore for SqliteBackend {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    fn get(&self, collection: &str, id: &str) -> Result<Option<StoredRecord>> {
        let record = self
            .conn
            .query_row(
                "SELECT id, data, updated_at FROM records WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                |row| {
                    Ok(StoredRecord {
                        id: row.get(0)?,
                        data: row.get(1)?,
                        updated_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    fn scan(&self, collection: &str, filters: &[Filter]) -> Result<Vec<StoredRecord>> {
        let (clause, params) = where_clause(collection, filters);
        let sql = format!("SELECT r.id, r.data, r.updated_at FROM records r WHERE {clause} ORDER BY r.id");
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
            Ok(StoredRecord {
                id: row.get(0)?,
                data: row.get(1)?,
                updated_at: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn scan_index(&self, collection: &str, filters: &[Filter]) -> Result<Vec<IndexedEntry>> {
        let (clause, params) = where_clause(collection, filters);
        let sql = format!(
            "SELECT r.id, r.updated_at, i.field, i.value FROM records r \
             LEFT JOIN record_index i ON i.collection = r.collection AND i.id = r.id \
             WHERE {clause} ORDER BY r.id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Value>(3)?,
            ))
        })?;

        let mut entries: Vec<IndexedEntry> = Vec::new();
        for row in rows {
            let (id, updated_at, field, value) = row?;
            if entries.last().is_none_or(|e| e.id != id) {
                entries.push(IndexedEntry {
                    id,
                    updated_at,
                    fields: HashMap::new(),
                });
            }
            if let (Some(field), Some(value), Some(entry)) = (field, from_sql(value), entries.last_mut()) {
                entry.fields.insert(field, value);
            }
        }
        Ok(entries)
    }

    fn write(&mut self, write: RecordWrite, expect: Expect) -> Result<bool> {
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current: Option<i64> = tx
            .query_row(
                "SELECT updated_at FROM records WHERE collection = ?1 AND id = ?2",
                params![write.collection, write.id],
                |row| row.get(0),
            )
            .optional()?;

        if !expect.holds(current) {
            debug!(id = %write.id, ?expect, ?current, "SqliteBackend::write: precondition failed");
            tx.rollback()?;
            return Ok(false);
        }

        tx.execute(
            "INSERT INTO records (collection, id, data, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (collection, id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
            params![write.collection, write.id, write.data, write.updated_at],
        )?;
        tx.execute(
            "DELETE FROM record_index WHERE collection = ?1 AND id = ?2",
            params![write.collection, write.id],
        )?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO record_index (collection, id, field, value) VALUES (?1, ?2, ?3, ?4)")?;
            for (field, value) in &write.index {
                stmt.execute(params![write.collection, write.id, field, to_sql(value)])?;
            }
        }
        tx.commit()?;
        Ok(true)
    }

    fn remove(&mut self, collection: &str, id: &str) -> Result<bool> {
        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "DELETE FROM record_index WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )?;
        let removed = tx.execute(
            "DELETE FROM records WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )?;
        tx.commit()?;
        Ok(removed > 0)
    }

    fn close(self: Box<Self>) -> Result<()> {
        debug!("SqliteBackend::close: called");
        self.conn.close().map_err(|(_, e)| e)?;
        Ok(())
    }
}
