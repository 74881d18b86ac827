//! Escalation log
//!
//! Permanently failed tasks need a human. Each escalation is logged with
//! `warn!` and, when a path is configured, appended to a JSONL file.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::domain::ScheduledTask;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRecord {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub task_id: String,
    pub name: String,
    pub owner_id: String,
    pub reason: String,
    pub total_retries: u32,
    pub correlation_id: Option<String>,
}

impl EscalationRecord {
    pub fn new(task: &ScheduledTask, reason: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            task_id: task.id.clone(),
            name: task.name.clone(),
            owner_id: task.owner_id.clone(),
            reason: reason.to_string(),
            total_retries: task.retry_count,
            correlation_id: task.correlation_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EscalationLog {
    path: Option<PathBuf>,
}

impl EscalationLog {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Log an escalation; file errors are reported but do not undo it
    pub async fn record(&self, record: &EscalationRecord) -> eyre::Result<()> {
        warn!(
            task_id = %record.task_id,
            name = %record.name,
            owner_id = %record.owner_id,
            total_retries = record.total_retries,
            reason = %record.reason,
            "Task permanently failed, escalating"
        );

        let Some(ref path) = self.path else {
            return Ok(());
        };
        debug!(path = %path.display(), "EscalationLog::record: appending");
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Read all parseable escalation records from `path`
pub fn read_escalations(path: impl AsRef<Path>) -> eyre::Result<Vec<EscalationRecord>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }
    Ok(std::fs::read_to_string(path)?
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect())
}
