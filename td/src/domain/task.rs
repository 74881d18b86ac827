//! ScheduledTask domain type
//!
//! A recurring (or one-shot) unit of work plus its mutable run state.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use taskstore::{IndexValue, Record, now_ms};

use super::id::generate_id;

/// Default retry budget for new tasks
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Owner assigned when a spec names none
pub const DEFAULT_OWNER: &str = "default";

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for `next_run`
    #[default]
    Pending,
    /// Dispatched to the actuator
    Running,
    /// Last run succeeded (transient for recurring tasks)
    Completed,
    /// Last run failed; eligible for durable retry
    Failed,
    /// Retries exhausted; terminal
    PermanentlyFailed,
    /// Held by the user
    Paused,
    /// Actuator is pushing input into the worker
    Injecting,
    /// Actuator is waiting on the worker's reply
    AwaitingResponse,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 8] = [
        Self::Pending,
        Self::Running,
        Self::Completed,
        Self::Failed,
        Self::PermanentlyFailed,
        Self::Paused,
        Self::Injecting,
        Self::AwaitingResponse,
    ];

    /// Statuses the stuck-task sweep watches
    pub const BUSY: [TaskStatus; 3] = [Self::Running, Self::Injecting, Self::AwaitingResponse];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::PermanentlyFailed => "permanently_failed",
            Self::Paused => "paused",
            Self::Injecting => "injecting",
            Self::AwaitingResponse => "awaiting_response",
        }
    }

    /// Work is in flight
    pub fn is_busy(&self) -> bool {
        Self::BUSY.contains(self)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown task status '{s}'"))
    }
}

/// Input to `add_task`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    #[serde(default = "default_owner")]
    pub owner_id: String,
    pub recurrence_rule: String,
    #[serde(default)]
    pub one_shot: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

fn default_owner() -> String {
    DEFAULT_OWNER.to_string()
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

impl TaskSpec {
    pub fn new(name: impl Into<String>, recurrence_rule: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner_id: default_owner(),
            recurrence_rule: recurrence_rule.into(),
            one_shot: false,
            priority: 0,
            timeout_seconds: None,
            max_retries: DEFAULT_MAX_RETRIES,
            parameters: Map::new(),
            tags: BTreeSet::new(),
        }
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = owner_id.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn one_shot(mut self) -> Self {
        self.one_shot = true;
        self
    }
}

/// A scheduled task and its run state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    #[serde(rename = "task_id")]
    pub id: String,

    pub name: String,

    /// Worker that owns (and receives commands for) this task
    pub owner_id: String,

    /// 5-field cron expression
    pub recurrence_rule: String,

    /// Stays COMPLETED after a successful run instead of rescheduling
    #[serde(default)]
    pub one_shot: bool,

    /// Higher runs first
    #[serde(default)]
    pub priority: i32,

    pub status: TaskStatus,

    #[serde(default)]
    pub timeout_seconds: Option<u64>,

    pub max_retries: u32,

    /// Resets to 0 on success; frozen once retries are exhausted
    pub retry_count: u32,

    /// Passed verbatim to the actuator
    #[serde(default)]
    pub parameters: Map<String, Value>,

    pub next_run: Option<DateTime<Utc>>,

    pub last_run: Option<DateTime<Utc>>,

    /// Output of the last successful run
    pub result: Option<Value>,

    /// Reason for the last failure
    pub error: Option<String>,

    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// Regenerated for every dispatch
    pub correlation_id: Option<String>,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,

    /// Last update timestamp (Unix milliseconds); strictly increases per write
    pub updated_at: i64,
}

impl ScheduledTask {
    /// Build a PENDING task from a validated spec
    pub fn from_spec(spec: TaskSpec, next_run: Option<DateTime<Utc>>) -> Self {
        let now = now_ms();
        Self {
            id: generate_id("task", &spec.name),
            name: spec.name,
            owner_id: spec.owner_id,
            recurrence_rule: spec.recurrence_rule,
            one_shot: spec.one_shot,
            priority: spec.priority,
            status: TaskStatus::Pending,
            timeout_seconds: spec.timeout_seconds,
            max_retries: spec.max_retries,
            retry_count: 0,
            parameters: spec.parameters,
            next_run,
            last_run: None,
            result: None,
            error: None,
            tags: spec.tags,
            correlation_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Version used for compare-and-swap
    pub fn version(&self) -> i64 {
        self.updated_at
    }

    /// Advance `updated_at`, strictly past the previous value
    pub fn touch(&mut self) {
        self.updated_at = now_ms().max(self.updated_at + 1);
    }

    /// Fresh correlation id for a dispatch
    pub fn new_correlation_id(&mut self) -> &str {
        self.correlation_id.insert(uuid::Uuid::now_v7().to_string())
    }

    /// Due for dispatch at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending && self.next_run.is_some_and(|at| at <= now)
    }

    /// Another retry is still allowed
    pub fn has_retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

impl Record for ScheduledTask {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "scheduled_tasks"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("status".to_string(), IndexValue::String(self.status.to_string()));
        fields.insert("owner_id".to_string(), IndexValue::String(self.owner_id.clone()));
        fields.insert("priority".to_string(), IndexValue::Int(i64::from(self.priority)));
        fields.insert("retry_count".to_string(), IndexValue::Int(i64::from(self.retry_count)));
        fields.insert("max_retries".to_string(), IndexValue::Int(i64::from(self.max_retries)));
        if let Some(ref correlation_id) = self.correlation_id {
            fields.insert("correlation_id".to_string(), IndexValue::String(correlation_id.clone()));
        }
        if let Some(next_run) = self.next_run {
            fields.insert("next_run".to_string(), IndexValue::Int(next_run.timestamp_millis()));
        }
        for tag in &self.tags {
            fields.insert(format!("tag.{}", tag), IndexValue::Bool(true));
        }
        fields
    }
}
