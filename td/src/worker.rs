//! Worker - live operational state plus its checkpoints
//!
//! The worker's live state mixes what the store knows about the tasks it
//! owns (current task, waiting work) with context and memory maintained by
//! whatever drives the worker. Checkpoints snapshot all of it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use checkpointstore::{CheckpointError, CheckpointKind, CheckpointManager, CheckpointRef, WorkerState};
use chrono::Utc;
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use crate::domain::TaskStatus;
use crate::error::TaskError;
use crate::recovery::DriftCheck;
use crate::state::StateManager;

pub struct Worker {
    owner_id: String,
    state: StateManager,
    checkpoints: CheckpointManager,
    live: Mutex<WorkerState>,
}

async fn blocking<T: Send + 'static>(
    f: impl FnOnce() -> Result<T, CheckpointError> + Send + 'static,
) -> Result<T, TaskError> {
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TaskError::Persistence(format!("Checkpoint task failed: {}", e)))?
        .map_err(TaskError::from)
}

impl Worker {
    pub fn new(state: StateManager, checkpoints: CheckpointManager) -> Self {
        let owner_id = checkpoints.owner_id().to_string();
        debug!(%owner_id, "Worker::new: called");
        Self {
            owner_id,
            state,
            checkpoints,
            live: Mutex::new(WorkerState::default()),
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub async fn live_state(&self) -> WorkerState {
        self.live.lock().await.clone()
    }

    /// Mutate context or memory held by the worker
    pub async fn update_live(&self, f: impl FnOnce(&mut WorkerState)) {
        f(&mut *self.live.lock().await);
    }

    /// Pull the store-derived parts of live state
    ///
    /// `current_task` is the busy task this worker owns (if any) and
    /// `pending_message_count` the number of its tasks due but not yet
    /// dispatched. Memory is left alone.
    pub async fn refresh(&self) -> Result<(), TaskError> {
        debug!(owner_id = %self.owner_id, "refresh: called");
        let tasks = self.state.list_tasks_for_owner(&self.owner_id).await?;
        let now = Utc::now();

        let current_task = tasks
            .iter()
            .filter(|t| t.status.is_busy())
            .max_by_key(|t| t.updated_at)
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| TaskError::Persistence(e.to_string()))?;
        let pending = tasks.iter().filter(|t| t.is_due(now)).count() as u64;
        let mut by_status = serde_json::Map::new();
        for status in TaskStatus::ALL {
            let n = tasks.iter().filter(|t| t.status == status).count();
            if n > 0 {
                by_status.insert(status.to_string(), json!(n));
            }
        }

        let mut live = self.live.lock().await;
        live.current_task = current_task;
        live.pending_message_count = pending;
        live.operational_context
            .insert("owner_id".to_string(), Value::from(self.owner_id.clone()));
        live.operational_context
            .insert("tasks_by_status".to_string(), Value::Object(by_status));
        live.operational_context
            .insert("refreshed_at".to_string(), Value::from(now.to_rfc3339()));
        Ok(())
    }

    /// Refresh, then snapshot live state
    pub async fn create_checkpoint(&self, kind: CheckpointKind) -> Result<CheckpointRef, TaskError> {
        debug!(owner_id = %self.owner_id, %kind, "create_checkpoint: called");
        self.refresh().await?;
        let snapshot = self.live_state().await;
        let manager = self.checkpoints.clone();
        let r = blocking(move || manager.create_checkpoint(kind, &snapshot)).await?;
        debug!(owner_id = %self.owner_id, %kind, path = %r.path.display(), "create_checkpoint: done");
        Ok(r)
    }

    /// Replace live state with a checkpoint's; all or nothing
    pub async fn restore_checkpoint(&self, r: &CheckpointRef) -> Result<(), TaskError> {
        debug!(owner_id = %self.owner_id, path = %r.path.display(), "restore_checkpoint: called");
        let manager = self.checkpoints.clone();
        let r = r.clone();
        let mut scratch = self.live_state().await;
        let (restored, path) = blocking(move || {
            manager.restore_checkpoint(&r, &mut scratch)?;
            Ok((scratch, r.path))
        })
        .await?;
        *self.live.lock().await = restored;
        debug!(owner_id = %self.owner_id, path = %path.display(), "restore_checkpoint: live state replaced");
        Ok(())
    }

    pub async fn latest_checkpoint(&self, kind: CheckpointKind) -> Result<Option<CheckpointRef>, TaskError> {
        let manager = self.checkpoints.clone();
        blocking(move || manager.get_latest_checkpoint(kind)).await
    }

    pub async fn list_checkpoints(&self, kind: Option<CheckpointKind>) -> Result<Vec<CheckpointRef>, TaskError> {
        let manager = self.checkpoints.clone();
        blocking(move || manager.list_checkpoints(kind)).await
    }

    /// Routine checkpoints on a fixed cadence until shutdown
    pub async fn run_checkpoints(self: Arc<Self>, every: Duration, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(owner_id = %self.owner_id, every_secs = every.as_secs(), "Checkpoint cadence starting");
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick fires immediately; skip it so startup does not checkpoint
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.create_checkpoint(CheckpointKind::Routine).await {
                        warn!(owner_id = %self.owner_id, error = %e, "Routine checkpoint failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!(owner_id = %self.owner_id, "Checkpoint cadence stopping");
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl DriftCheck for Worker {
    async fn checkpoint_if_drifting(&self) -> Result<bool, TaskError> {
        self.refresh().await?;
        let live = self.live_state().await;
        if !self.checkpoints.detect_drift(&live) {
            return Ok(false);
        }
        warn!(owner_id = %self.owner_id, "Worker drift detected, taking recovery checkpoint");
        self.create_checkpoint(CheckpointKind::Recovery).await?;
        Ok(true)
    }
}
