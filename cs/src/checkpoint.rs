//! Checkpoint artifact types

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CheckpointError;

/// Artifact format version written by this crate
pub const CHECKPOINT_VERSION: u32 = 1;

/// Why a checkpoint was taken; drives retention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    /// Taken on the worker's regular cadence; count-limited
    Routine,
    /// Taken before a risky operation; age-limited
    PreOperation,
    /// Taken when drift is suspected; age-limited
    Recovery,
}

impl CheckpointKind {
    pub const ALL: [CheckpointKind; 3] = [Self::Routine, Self::PreOperation, Self::Recovery];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Routine => "routine",
            Self::PreOperation => "pre_operation",
            Self::Recovery => "recovery",
        }
    }
}

impl fmt::Display for CheckpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckpointKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "routine" => Ok(Self::Routine),
            "pre_operation" | "pre-operation" => Ok(Self::PreOperation),
            "recovery" => Ok(Self::Recovery),
            other => Err(format!("unknown checkpoint kind '{other}'")),
        }
    }
}

/// Live operational state of a worker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerState {
    /// Task the worker is currently handling, if any
    pub current_task: Option<Value>,
    pub pending_message_count: u64,
    pub operational_context: Map<String, Value>,
    pub memory: Map<String, Value>,
}

fn field<T: DeserializeOwned>(state: &Map<String, Value>, name: &str) -> Result<T, CheckpointError> {
    let raw = state
        .get(name)
        .ok_or_else(|| CheckpointError::Restore(format!("missing state field '{name}'")))?;
    serde_json::from_value(raw.clone())
        .map_err(|e| CheckpointError::Restore(format!("invalid state field '{name}': {e}")))
}

impl WorkerState {
    /// Serialize into the artifact's `state` object
    pub fn snapshot(&self) -> Value {
        let mut state = Map::new();
        state.insert(
            "current_task".to_string(),
            self.current_task.clone().unwrap_or(Value::Null),
        );
        state.insert(
            "pending_message_count".to_string(),
            Value::from(self.pending_message_count),
        );
        state.insert(
            "operational_context".to_string(),
            Value::Object(self.operational_context.clone()),
        );
        state.insert("memory".to_string(), Value::Object(self.memory.clone()));
        Value::Object(state)
    }

    /// Parse every field of a snapshot independently
    ///
    /// Fails on the first unusable field, naming it; nothing is returned
    /// partially.
    pub fn from_snapshot(state: &Value) -> Result<Self, CheckpointError> {
        let state = state
            .as_object()
            .ok_or_else(|| CheckpointError::Restore("state is not an object".to_string()))?;
        let current_task: Value = field(state, "current_task")?;
        Ok(Self {
            current_task: (!current_task.is_null()).then_some(current_task),
            pending_message_count: field(state, "pending_message_count")?,
            operational_context: field(state, "operational_context")?,
            memory: field(state, "memory")?,
        })
    }
}

/// `version` is a decimal string on disk; bare integers are read too
mod version_format {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }

    pub fn serialize<S: Serializer>(version: &u32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(version)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(n),
            Raw::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| D::Error::custom(format!("invalid checkpoint version '{s}'"))),
        }
    }
}

/// Immutable snapshot as persisted on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub kind: CheckpointKind,
    #[serde(with = "version_format")]
    pub version: u32,
    pub state: Value,
}

impl Checkpoint {
    /// `created_at` is truncated to milliseconds, the precision of the file name
    pub fn new(owner_id: impl Into<String>, kind: CheckpointKind, created_at: DateTime<Utc>, state: &WorkerState) -> Self {
        Self {
            owner_id: owner_id.into(),
            created_at: DateTime::from_timestamp_millis(created_at.timestamp_millis()).unwrap_or(created_at),
            kind,
            version: CHECKPOINT_VERSION,
            state: state.snapshot(),
        }
    }

    /// File name encoding kind and creation time, sortable per kind
    pub fn file_name(&self) -> String {
        format!("{}-{:016}.json", self.kind, self.created_at.timestamp_millis())
    }
}

/// Handle to a persisted checkpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRef {
    pub owner_id: String,
    pub kind: CheckpointKind,
    pub created_at: DateTime<Utc>,
    pub path: PathBuf,
}

impl CheckpointRef {
    /// Recover a ref from an artifact path; `None` for foreign files
    pub fn from_path(owner_id: &str, path: &Path) -> Option<Self> {
        let stem = path.file_name()?.to_str()?.strip_suffix(".json")?;
        let (kind, millis) = stem.rsplit_once('-')?;
        let kind = kind.parse().ok()?;
        let created_at = DateTime::from_timestamp_millis(millis.parse().ok()?)?;
        Some(Self {
            owner_id: owner_id.to_string(),
            kind,
            created_at,
            path: path.to_path_buf(),
        })
    }
}
