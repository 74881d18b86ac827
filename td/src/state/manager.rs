//! StateManager - actor that owns the task store
//!
//! Processes commands via channels for thread-safe access to persistent state.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::domain::{Filter, FilterOp, IndexValue, ScheduledTask, Store, TaskRecord, TaskStatus};

use super::messages::{StateCommand, StateError, StateResponse};

/// Re-read attempts before `modify` gives up with `Conflict`
const MAX_CAS_ATTEMPTS: usize = 5;

/// Handle to send commands to the StateManager
#[derive(Clone, Debug)]
pub struct StateManager {
    tx: mpsc::Sender<StateCommand>,
}

impl StateManager {
    /// Open a durable store in `store_path` and spawn the actor
    pub fn spawn(store_path: impl AsRef<Path>) -> eyre::Result<Self> {
        debug!(store_path = %store_path.as_ref().display(), "spawn: called");
        let mut store = Store::open(store_path.as_ref())?;

        // Index rows may predate the current indexed_fields
        let task_count = store.rebuild_indexes::<ScheduledTask>()?;
        info!(task_count, "Rebuilt indexes for ScheduledTask records");

        Ok(Self::spawn_with_store(store))
    }

    /// Spawn over a non-durable in-memory store
    pub fn spawn_in_memory() -> Self {
        debug!("spawn_in_memory: called");
        Self::spawn_with_store(Store::in_memory())
    }

    pub fn spawn_with_store(store: Store) -> Self {
        debug!(backend = store.backend_name(), "spawn_with_store: called");
        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(store, rx));
        info!("StateManager spawned");
        Self { tx }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<StateResponse<T>>) -> StateCommand,
    ) -> StateResponse<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    // === Task operations ===

    /// Insert a new task; fails if the id already exists
    pub async fn create_task(&self, task: ScheduledTask) -> StateResponse<String> {
        debug!(task_id = %task.id, name = %task.name, "create_task: called");
        self.request(|reply| StateCommand::CreateTask { task, reply }).await
    }

    pub async fn get_task(&self, id: &str) -> StateResponse<Option<ScheduledTask>> {
        debug!(%id, "get_task: called");
        let id = id.to_string();
        self.request(|reply| StateCommand::GetTask { id, reply }).await
    }

    /// Get a task, mapping a missing record to `NotFound`
    pub async fn get_task_required(&self, id: &str) -> StateResponse<ScheduledTask> {
        self.get_task(id)
            .await?
            .ok_or_else(|| StateError::NotFound(id.to_string()))
    }

    /// Raw compare-and-swap; `task.updated_at` must already be advanced
    pub async fn compare_and_swap(&self, task: ScheduledTask, expected_updated_at: i64) -> StateResponse<bool> {
        debug!(task_id = %task.id, expected_updated_at, "compare_and_swap: called");
        self.request(|reply| StateCommand::CompareAndSwap {
            task,
            expected_updated_at,
            reply,
        })
        .await
    }

    /// Apply `mutate` to a copy of `task` and commit it against `task`'s version
    ///
    /// Returns the committed task, or `None` if another writer got there first.
    pub async fn transition(
        &self,
        task: &ScheduledTask,
        mutate: impl FnOnce(&mut ScheduledTask),
    ) -> StateResponse<Option<ScheduledTask>> {
        debug!(task_id = %task.id, status = %task.status, "transition: called");
        let mut updated = task.clone();
        mutate(&mut updated);
        updated.touch();
        if self.compare_and_swap(updated.clone(), task.version()).await? {
            Ok(Some(updated))
        } else {
            debug!(task_id = %task.id, "transition: lost compare-and-swap");
            Ok(None)
        }
    }

    /// Re-read and mutate until the write commits
    ///
    /// `guard` is checked against every fresh read; when it rejects the
    /// current state the caller yields and gets `Ok(None)`.
    pub async fn modify<G, M>(&self, id: &str, guard: G, mutate: M) -> StateResponse<Option<ScheduledTask>>
    where
        G: Fn(&ScheduledTask) -> bool,
        M: Fn(&mut ScheduledTask),
    {
        debug!(%id, "modify: called");
        for attempt in 0..MAX_CAS_ATTEMPTS {
            let current = self.get_task_required(id).await?;
            if !guard(&current) {
                debug!(%id, status = %current.status, "modify: guard rejected current state");
                return Ok(None);
            }
            if let Some(updated) = self.transition(&current, &mutate).await? {
                return Ok(Some(updated));
            }
            debug!(%id, attempt, "modify: retrying after conflict");
        }
        warn!(%id, attempts = MAX_CAS_ATTEMPTS, "Giving up after repeated write conflicts");
        Err(StateError::Conflict(id.to_string()))
    }

    /// List tasks, optionally filtered by status and tag
    pub async fn list_tasks(&self, status: Option<TaskStatus>, tag: Option<&str>) -> StateResponse<Vec<ScheduledTask>> {
        debug!(?status, ?tag, "list_tasks: called");
        let mut filters = Vec::new();
        if let Some(status) = status {
            filters.push(Filter::eq("status", status.as_str()));
        }
        if let Some(tag) = tag {
            filters.push(Filter::eq(format!("tag.{}", tag), true));
        }
        self.request(|reply| StateCommand::ListTasks { filters, reply }).await
    }

    /// All tasks owned by one worker
    pub async fn list_tasks_for_owner(&self, owner_id: &str) -> StateResponse<Vec<ScheduledTask>> {
        debug!(%owner_id, "list_tasks_for_owner: called");
        let filters = vec![Filter::eq("owner_id", owner_id)];
        self.request(|reply| StateCommand::ListTasks { filters, reply }).await
    }

    /// PENDING tasks whose `next_run` is at or before `now`
    pub async fn list_due(&self, now: DateTime<Utc>) -> StateResponse<Vec<ScheduledTask>> {
        debug!(%now, "list_due: called");
        let filters = vec![
            Filter::eq("status", TaskStatus::Pending.as_str()),
            Filter::new("next_run", FilterOp::Lte, IndexValue::Int(now.timestamp_millis())),
        ];
        self.request(|reply| StateCommand::ListTasks { filters, reply }).await
    }

    /// Index-only records in any of `statuses`
    pub async fn list_records(&self, statuses: &[TaskStatus]) -> StateResponse<Vec<TaskRecord>> {
        debug!(?statuses, "list_records: called");
        let mut records = Vec::new();
        for status in statuses {
            let filters = vec![Filter::eq("status", status.as_str())];
            records.extend(self.request(|reply| StateCommand::ListRecords { filters, reply }).await?);
        }
        Ok(records)
    }

    /// Number of tasks in each status
    pub async fn status_counts(&self) -> StateResponse<HashMap<TaskStatus, usize>> {
        debug!("status_counts: called");
        let records = self
            .request(|reply| StateCommand::ListRecords {
                filters: Vec::new(),
                reply,
            })
            .await?;
        let mut counts = HashMap::new();
        for record in records {
            *counts.entry(record.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Delete a task; returns whether it existed
    pub async fn delete_task(&self, id: &str) -> StateResponse<bool> {
        debug!(%id, "delete_task: called");
        let id = id.to_string();
        self.request(|reply| StateCommand::DeleteTask { id, reply }).await
    }

    pub async fn rebuild_indexes(&self) -> StateResponse<usize> {
        debug!("rebuild_indexes: called");
        self.request(|reply| StateCommand::RebuildIndexes { reply }).await
    }

    /// Close the store and stop the actor
    pub async fn shutdown(&self) -> StateResponse<()> {
        debug!("shutdown: called");
        self.request(|reply| StateCommand::Shutdown { reply }).await
    }
}

fn store_err(e: eyre::Report) -> StateError {
    StateError::StoreError(format!("{:#}", e))
}

/// The actor loop that owns the Store and processes commands
async fn actor_loop(mut store: Store, mut rx: mpsc::Receiver<StateCommand>) {
    debug!("actor_loop: called");
    let mut shutdown_reply = None;

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StateCommand::CreateTask { task, reply } => {
                debug!(task_id = %task.id, "actor_loop: CreateTask command");
                let _ = reply.send(store.create(task).map_err(store_err));
            }

            StateCommand::GetTask { id, reply } => {
                debug!(%id, "actor_loop: GetTask command");
                let _ = reply.send(store.get(&id).map_err(store_err));
            }

            StateCommand::CompareAndSwap {
                task,
                expected_updated_at,
                reply,
            } => {
                debug!(task_id = %task.id, expected_updated_at, "actor_loop: CompareAndSwap command");
                let _ = reply.send(store.compare_and_swap(task, expected_updated_at).map_err(store_err));
            }

            StateCommand::ListTasks { filters, reply } => {
                debug!(filters = filters.len(), "actor_loop: ListTasks command");
                let _ = reply.send(store.list(&filters).map_err(store_err));
            }

            StateCommand::ListRecords { filters, reply } => {
                debug!(filters = filters.len(), "actor_loop: ListRecords command");
                let result = store
                    .list_indexed::<ScheduledTask>(&filters)
                    .map_err(store_err)
                    .map(|entries| {
                        entries
                            .iter()
                            .filter_map(|entry| {
                                let record = TaskRecord::from_entry(entry);
                                if record.is_none() {
                                    warn!(task_id = %entry.id, "Skipping task with incomplete index rows");
                                }
                                record
                            })
                            .collect()
                    });
                let _ = reply.send(result);
            }

            StateCommand::DeleteTask { id, reply } => {
                debug!(%id, "actor_loop: DeleteTask command");
                let _ = reply.send(store.delete::<ScheduledTask>(&id).map_err(store_err));
            }

            StateCommand::RebuildIndexes { reply } => {
                debug!("actor_loop: RebuildIndexes command");
                let _ = reply.send(store.rebuild_indexes::<ScheduledTask>().map_err(store_err));
            }

            StateCommand::Shutdown { reply } => {
                debug!("actor_loop: Shutdown command");
                info!("StateManager shutting down");
                shutdown_reply = Some(reply);
                break;
            }
        }
    }

    let result = store.close().map_err(store_err);
    if let Err(ref e) = result {
        warn!(error = %e, "Failed to close store");
    }
    if let Some(reply) = shutdown_reply {
        let _ = reply.send(result);
    }
    debug!("StateManager actor stopped");
}
