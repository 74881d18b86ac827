//! Scheduler implementation

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::actuator::Actuator;
use crate::domain::{Recurrence, ScheduledTask, TaskSpec, TaskStatus, next_run};
use crate::error::TaskError;
use crate::events::EventSink;
use crate::state::StateManager;

use super::config::SchedulerConfig;
use super::executor::Executor;
use super::stats::{SchedulerStats, TransitionCounters};
use super::writer::TaskWriter;

/// Owns the task population's dispatch: the public task API plus the tick loop
///
/// `running` holds one handle per task dispatched by this instance and not
/// yet reaped; its size never exceeds `max_concurrent_tasks`.
pub struct Scheduler {
    config: SchedulerConfig,
    writer: TaskWriter,
    executor: Executor,
    running: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        state: StateManager,
        actuator: Arc<dyn Actuator>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self::with_counters(config, state, actuator, events, Arc::new(TransitionCounters::default()))
    }

    /// Share transition counters with other writers (e.g. the recovery coordinator)
    pub fn with_counters(
        config: SchedulerConfig,
        state: StateManager,
        actuator: Arc<dyn Actuator>,
        events: Arc<dyn EventSink>,
        counters: Arc<TransitionCounters>,
    ) -> Self {
        debug!(?config, "Scheduler::new: called");
        let writer = TaskWriter::new(state, events, counters);
        let executor = Executor::new(writer.clone(), actuator, config.clone());
        Self {
            config,
            writer,
            executor,
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn writer(&self) -> &TaskWriter {
        &self.writer
    }

    fn state(&self) -> &StateManager {
        self.writer.state()
    }

    // === Task API ===

    /// Validate and persist a new task; nothing is written on validation failure
    pub async fn add_task(&self, spec: TaskSpec) -> Result<String, TaskError> {
        debug!(name = %spec.name, rule = %spec.recurrence_rule, "add_task: called");
        if spec.name.trim().is_empty() {
            return Err(TaskError::Validation("Task name must not be empty".to_string()));
        }
        if spec.owner_id.trim().is_empty() {
            return Err(TaskError::Validation("Task owner must not be empty".to_string()));
        }
        let recurrence = Recurrence::parse(&spec.recurrence_rule)?;
        let first_run = recurrence.next_after(Utc::now());

        let task = ScheduledTask::from_spec(spec, first_run);
        let id = self.state().create_task(task).await?;
        info!(task_id = %id, next_run = ?first_run, "Task added");
        Ok(id)
    }

    pub async fn get_task(&self, id: &str) -> Result<ScheduledTask, TaskError> {
        Ok(self.state().get_task_required(id).await?)
    }

    pub async fn list_tasks(&self, status: Option<TaskStatus>, tag: Option<&str>) -> Result<Vec<ScheduledTask>, TaskError> {
        Ok(self.state().list_tasks(status, tag).await?)
    }

    /// PENDING -> PAUSED; false if the task is in any other status
    pub async fn pause_task(&self, id: &str) -> Result<bool, TaskError> {
        debug!(%id, "pause_task: called");
        let paused = self
            .state()
            .modify(id, |t| t.status == TaskStatus::Pending, |t| t.status = TaskStatus::Paused)
            .await?;
        if let Some(ref task) = paused {
            self.writer.counters().record(task.status);
            info!(task_id = %id, "Task paused");
        }
        Ok(paused.is_some())
    }

    /// PAUSED -> PENDING with `next_run` recomputed from now
    pub async fn resume_task(&self, id: &str) -> Result<bool, TaskError> {
        debug!(%id, "resume_task: called");
        let resumed = self
            .state()
            .modify(
                id,
                |t| t.status == TaskStatus::Paused,
                |t| {
                    t.status = TaskStatus::Pending;
                    t.next_run = next_run(&t.recurrence_rule, Utc::now()).ok().flatten();
                },
            )
            .await?;
        if let Some(ref task) = resumed {
            self.writer.counters().record(task.status);
            info!(task_id = %id, next_run = ?task.next_run, "Task resumed");
        }
        Ok(resumed.is_some())
    }

    /// Make a PENDING task due immediately
    pub async fn run_now(&self, id: &str) -> Result<bool, TaskError> {
        debug!(%id, "run_now: called");
        let updated = self
            .state()
            .modify(id, |t| t.status == TaskStatus::Pending, |t| t.next_run = Some(Utc::now()))
            .await?;
        if updated.is_some() {
            info!(task_id = %id, "Task marked due now");
        }
        Ok(updated.is_some())
    }

    /// Abort any in-flight run and delete the record
    pub async fn remove_task(&self, id: &str) -> Result<bool, TaskError> {
        debug!(%id, "remove_task: called");
        if let Some(handle) = self.running.lock().await.remove(id) {
            debug!(%id, "remove_task: aborting in-flight run");
            handle.abort();
        }
        let removed = self.state().delete_task(id).await?;
        if removed {
            info!(task_id = %id, "Task removed");
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<SchedulerStats, TaskError> {
        SchedulerStats::collect(self.state(), self.writer.counters()).await
    }

    /// Tasks dispatched by this instance and not yet reaped
    pub async fn running_count(&self) -> usize {
        self.running.lock().await.len()
    }

    // === Dispatch ===

    /// Reap finished runs and dispatch due tasks up to capacity
    ///
    /// Returns the number of tasks dispatched.
    pub async fn tick(&self) -> Result<usize, TaskError> {
        let mut running = self.running.lock().await;
        running.retain(|id, handle| {
            let finished = handle.is_finished();
            if finished {
                debug!(task_id = %id, "tick: reaped finished run");
            }
            !finished
        });

        if running.len() >= self.config.max_concurrent_tasks {
            debug!(running = running.len(), "tick: at capacity");
            return Ok(0);
        }

        let now = Utc::now();
        let mut due = self.state().list_due(now).await?;
        due.retain(|task| !running.contains_key(&task.id));
        due.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.next_run.cmp(&b.next_run)));
        debug!(due = due.len(), running = running.len(), "tick: candidates");

        let mut dispatched = 0;
        for task in due {
            if running.len() >= self.config.max_concurrent_tasks {
                break;
            }
            let Some(task) = self
                .writer
                .commit(&task, |t| {
                    t.status = TaskStatus::Running;
                    t.last_run = Some(now);
                    t.new_correlation_id();
                })
                .await?
            else {
                continue;
            };

            info!(
                task_id = %task.id,
                priority = task.priority,
                correlation_id = ?task.correlation_id,
                "Dispatching task"
            );
            let id = task.id.clone();
            let executor = self.executor.clone();
            let handle = tokio::spawn(async move {
                let task_id = task.id.clone();
                if let Err(e) = executor.run(task).await {
                    // Stuck sweep picks it up if this left it RUNNING
                    error!(%task_id, error = %e, "Executor failed to record outcome");
                }
            });
            running.insert(id, handle);
            dispatched += 1;
        }
        Ok(dispatched)
    }

    /// Wait until every dispatched run has finished
    pub async fn wait_for_idle(&self) {
        loop {
            {
                let mut running = self.running.lock().await;
                running.retain(|_, handle| !handle.is_finished());
                if running.is_empty() {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Tick until shutdown is signalled, then drain in-flight runs
    pub async fn run(&self, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(
            tick_ms = self.config.tick_ms,
            max_concurrent = self.config.max_concurrent_tasks,
            "Scheduler starting"
        );
        let mut interval = tokio::time::interval(self.config.tick());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        // Retried on the next tick
                        warn!(error = %e, "Scheduler tick failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Scheduler shutdown signal received");
                    break;
                }
            }
        }

        self.shutdown().await;
    }

    async fn shutdown(&self) {
        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout();
        debug!(timeout = ?self.config.shutdown_timeout(), "shutdown: waiting for runs to complete");

        loop {
            let mut running = self.running.lock().await;
            running.retain(|_, handle| !handle.is_finished());
            if running.is_empty() {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(remaining = running.len(), "Aborting runs still in flight at shutdown");
                for (task_id, handle) in running.drain() {
                    debug!(%task_id, "shutdown: aborting run");
                    handle.abort();
                }
                break;
            }
            drop(running);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        info!("Scheduler stopped");
    }
}
