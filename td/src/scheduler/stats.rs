//! Scheduler statistics
//!
//! Everything here is derived from committed state: status counts come from
//! the store, transition counters are bumped only after a write commits.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::debug;

use crate::domain::TaskStatus;
use crate::error::TaskError;
use crate::state::StateManager;

/// Committed transitions, by target status
#[derive(Debug, Default)]
pub struct TransitionCounters {
    counts: [AtomicU64; TaskStatus::ALL.len()],
}

impl TransitionCounters {
    pub fn record(&self, to: TaskStatus) {
        self.counts[to as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, to: TaskStatus) -> u64 {
        self.counts[to as usize].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        TaskStatus::ALL
            .into_iter()
            .map(|status| (status.to_string(), self.get(status)))
            .filter(|(_, count)| *count > 0)
            .collect()
    }
}

/// Point-in-time view of the task population
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    /// Ids of tasks in a busy status
    pub running: Vec<String>,
    /// Tasks that ended PERMANENTLY_FAILED
    pub escalations: usize,
    /// Transitions committed by this process
    pub transitions: BTreeMap<String, u64>,
}

impl SchedulerStats {
    pub async fn collect(state: &StateManager, counters: &TransitionCounters) -> Result<Self, TaskError> {
        debug!("SchedulerStats::collect: called");
        let counts = state.status_counts().await?;
        let mut running: Vec<String> = state
            .list_records(&TaskStatus::BUSY)
            .await?
            .into_iter()
            .map(|record| record.task_id)
            .collect();
        running.sort();

        Ok(Self {
            total: counts.values().sum(),
            by_status: counts.iter().map(|(status, n)| (status.to_string(), *n)).collect(),
            running,
            escalations: counts.get(&TaskStatus::PermanentlyFailed).copied().unwrap_or(0),
            transitions: counters.snapshot(),
        })
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.by_status.get(status.as_str()).copied().unwrap_or(0)
    }
}
