//! Executor - runs one dispatched task through the actuator
//!
//! Timeout and actuator errors both take the failure path; inline retry is
//! bounded by the per-dispatch budget and by `max_retries`. The executor
//! never assigns PERMANENTLY_FAILED.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::actuator::Actuator;
use crate::domain::{ScheduledTask, TaskStatus, next_run};
use crate::error::TaskError;
use crate::retry;

use super::config::SchedulerConfig;
use super::writer::TaskWriter;

#[derive(Clone)]
pub struct Executor {
    writer: TaskWriter,
    actuator: Arc<dyn Actuator>,
    config: SchedulerConfig,
}

impl Executor {
    pub fn new(writer: TaskWriter, actuator: Arc<dyn Actuator>, config: SchedulerConfig) -> Self {
        Self {
            writer,
            actuator,
            config,
        }
    }

    async fn invoke(&self, task: &ScheduledTask) -> Result<Value, TaskError> {
        debug!(task_id = %task.id, timeout_seconds = ?task.timeout_seconds, "invoke: called");
        let call = self.actuator.execute(&task.parameters);
        let result = match task.timeout_seconds {
            Some(seconds) => match tokio::time::timeout(Duration::from_secs(seconds), call).await {
                Ok(result) => result,
                // Dropping the future is the best cancel we have
                Err(_) => return Err(TaskError::Timeout { seconds }),
            },
            None => call.await,
        };
        result.map_err(|e| TaskError::Execution(e.to_string()))
    }

    /// Run a task the scheduler has already committed as RUNNING
    ///
    /// Returns once the task is COMPLETED/PENDING, left FAILED, or taken over
    /// by another writer.
    pub async fn run(&self, mut task: ScheduledTask) -> Result<(), TaskError> {
        debug!(task_id = %task.id, name = %task.name, "run: called");
        let mut inline_used = 0;

        loop {
            let err = match self.invoke(&task).await {
                Ok(output) => return self.complete(&task, output).await,
                Err(err) => err,
            };
            warn!(task_id = %task.id, retry_count = task.retry_count, error = %err, "Task attempt failed");

            let Some(failed) = self.writer.fail(&task, &err.to_string()).await? else {
                return Ok(());
            };
            if !retry::should_retry_inline(
                failed.retry_count,
                failed.max_retries,
                inline_used,
                self.config.inline_retry_limit,
            ) {
                debug!(task_id = %failed.id, inline_used, "run: leaving task FAILED");
                return Ok(());
            }
            inline_used += 1;

            let delay = retry::backoff_delay(
                failed.retry_count + 1,
                self.config.backoff_base(),
                self.config.backoff_cap(),
            );
            let Some(pending) = self
                .writer
                .commit(&failed, |t| {
                    t.status = TaskStatus::Pending;
                    t.retry_count += 1;
                    t.next_run = chrono::Duration::from_std(delay)
                        .ok()
                        .and_then(|d| Utc::now().checked_add_signed(d));
                })
                .await?
            else {
                return Ok(());
            };

            info!(
                task_id = %pending.id,
                retry_count = pending.retry_count,
                delay_ms = delay.as_millis() as u64,
                "Retrying task inline"
            );
            tokio::time::sleep(delay).await;

            let Some(running) = self
                .writer
                .commit(&pending, |t| {
                    t.status = TaskStatus::Running;
                    t.last_run = Some(Utc::now());
                })
                .await?
            else {
                return Ok(());
            };
            task = running;
        }
    }

    async fn complete(&self, task: &ScheduledTask, output: Value) -> Result<(), TaskError> {
        debug!(task_id = %task.id, "complete: called");
        let Some(completed) = self
            .writer
            .commit(task, |t| {
                t.status = TaskStatus::Completed;
                t.retry_count = 0;
                t.result = Some(output);
                t.error = None;
                if t.one_shot {
                    t.next_run = None;
                }
            })
            .await?
        else {
            return Ok(());
        };
        info!(task_id = %completed.id, name = %completed.name, "Task completed");

        if completed.one_shot {
            return Ok(());
        }

        let next = match next_run(&completed.recurrence_rule, Utc::now()) {
            Ok(Some(next)) => next,
            Ok(None) => {
                info!(task_id = %completed.id, "No further occurrences, leaving task COMPLETED");
                return Ok(());
            }
            Err(e) => {
                warn!(task_id = %completed.id, error = %e, "Cannot reschedule task");
                return Ok(());
            }
        };

        if let Some(rescheduled) = self
            .writer
            .commit(&completed, |t| {
                t.status = TaskStatus::Pending;
                t.next_run = Some(next);
            })
            .await?
        {
            debug!(task_id = %rescheduled.id, next_run = ?rescheduled.next_run, "complete: rescheduled");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::ActuatorError;
    use crate::domain::TaskSpec;
    use crate::events::{EventBus, TaskEvent};
    use crate::scheduler::stats::TransitionCounters;
    use crate::state::StateManager;
    use async_trait::async_trait;
    use serde_json::{Map, json};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::broadcast;

    /// Fails the first `failures` calls, then succeeds
    struct Flaky {
        failures: AtomicU32,
        delay: Duration,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl Actuator for Flaky {
        async fn execute(&self, _parameters: &Map<String, Value>) -> Result<Value, ActuatorError> {
            tokio::time::sleep(self.delay).await;
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(ActuatorError::Failed("flaky".to_string()));
            }
            Ok(json!("ok"))
        }
    }

    struct Harness {
        state: StateManager,
        executor: Executor,
        counters: Arc<TransitionCounters>,
        rx: broadcast::Receiver<TaskEvent>,
    }

    fn harness(actuator: impl Actuator + 'static) -> Harness {
        let state = StateManager::spawn_in_memory();
        let bus = Arc::new(EventBus::default());
        let rx = bus.subscribe();
        let counters = Arc::new(TransitionCounters::default());
        let writer = TaskWriter::new(state.clone(), bus, counters.clone());
        let config = SchedulerConfig {
            backoff_base_ms: 1,
            backoff_cap_ms: 5,
            ..Default::default()
        };
        Harness {
            state: state.clone(),
            executor: Executor::new(writer, Arc::new(actuator), config),
            counters,
            rx,
        }
    }

    async fn running(state: &StateManager, spec: TaskSpec) -> ScheduledTask {
        let mut task = ScheduledTask::from_spec(spec, Some(Utc::now()));
        task.status = TaskStatus::Running;
        state.create_task(task.clone()).await.unwrap();
        task
    }

    fn drain(rx: &mut broadcast::Receiver<TaskEvent>) -> Vec<TaskEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[tokio::test]
    async fn test_success_reschedules() {
        let h = harness(Flaky::new(0));
        let task = running(&h.state, TaskSpec::new("sync", "* * * * *")).await;

        h.executor.run(task.clone()).await.unwrap();

        let stored = h.state.get_task_required(&task.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);
        assert_eq!(stored.result, Some(json!("ok")));
        assert!(stored.next_run.unwrap() > Utc::now());
        assert_eq!(h.counters.get(TaskStatus::Completed), 1);
        assert_eq!(h.counters.get(TaskStatus::Pending), 1);
    }

    #[tokio::test]
    async fn test_one_shot_stays_completed() {
        let h = harness(Flaky::new(0));
        let task = running(&h.state, TaskSpec::new("once", "* * * * *").one_shot()).await;

        h.executor.run(task.clone()).await.unwrap();

        let stored = h.state.get_task_required(&task.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert!(stored.next_run.is_none());
    }

    #[tokio::test]
    async fn test_inline_retry_then_success() {
        let mut h = harness(Flaky::new(1));
        let task = running(&h.state, TaskSpec::new("sync", "* * * * *").with_max_retries(3)).await;

        h.executor.run(task.clone()).await.unwrap();

        let stored = h.state.get_task_required(&task.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Pending);
        assert_eq!(stored.retry_count, 0);
        assert!(stored.error.is_none());

        let events = drain(&mut h.rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "TASK_FAILED");
    }

    #[tokio::test]
    async fn test_inline_budget_exhausted() {
        let mut h = harness(Flaky::new(u32::MAX));
        let task = running(&h.state, TaskSpec::new("sync", "* * * * *").with_max_retries(2)).await;

        h.executor.run(task.clone()).await.unwrap();

        let stored = h.state.get_task_required(&task.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(stored.retry_count, 1);
        assert!(stored.error.unwrap().contains("flaky"));

        let events = drain(&mut h.rx);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.event_type() == "TASK_FAILED"));
    }

    #[tokio::test]
    async fn test_no_retries_left_skips_inline() {
        let mut h = harness(Flaky::new(u32::MAX));
        let task = running(&h.state, TaskSpec::new("sync", "* * * * *").with_max_retries(0)).await;

        h.executor.run(task.clone()).await.unwrap();

        let stored = h.state.get_task_required(&task.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(stored.retry_count, 0);
        assert!(drain(&mut h.rx).is_empty());
    }

    #[tokio::test]
    async fn test_timeout_fails_task() {
        let actuator = Flaky {
            failures: AtomicU32::new(0),
            delay: Duration::from_secs(30),
        };
        let h = harness(actuator);
        let spec = TaskSpec::new("slow", "* * * * *").with_timeout(1).with_max_retries(0);
        let task = running(&h.state, spec).await;

        h.executor.run(task.clone()).await.unwrap();

        let stored = h.state.get_task_required(&task.id).await.unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert!(stored.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_removed_task_is_abandoned() {
        let h = harness(Flaky::new(0));
        let task = running(&h.state, TaskSpec::new("gone", "* * * * *")).await;
        h.state.delete_task(&task.id).await.unwrap();

        h.executor.run(task.clone()).await.unwrap();
        assert!(h.state.get_task(&task.id).await.unwrap().is_none());
    }
}
