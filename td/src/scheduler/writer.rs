//! TaskWriter - committed transitions and their side effects
//!
//! The scheduler, executor and recovery coordinator all mutate tasks through
//! this type, so a failure is classified and announced the same way no matter
//! who observed it.

use std::sync::Arc;

use tracing::{debug, info};

use crate::domain::{ScheduledTask, TaskStatus};
use crate::error::TaskError;
use crate::events::{EventSink, TaskEvent};
use crate::retry;
use crate::state::StateManager;

use super::stats::TransitionCounters;

#[derive(Clone)]
pub struct TaskWriter {
    state: StateManager,
    events: Arc<dyn EventSink>,
    counters: Arc<TransitionCounters>,
}

impl TaskWriter {
    pub fn new(state: StateManager, events: Arc<dyn EventSink>, counters: Arc<TransitionCounters>) -> Self {
        Self {
            state,
            events,
            counters,
        }
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    pub fn counters(&self) -> &Arc<TransitionCounters> {
        &self.counters
    }

    pub fn publish(&self, event: TaskEvent) {
        self.events.publish(event);
    }

    /// Commit a transition against the version of `task` the caller holds
    ///
    /// On a lost compare-and-swap the caller yields: `Ok(None)` means someone
    /// else now owns the next step for this task.
    pub async fn commit(
        &self,
        task: &ScheduledTask,
        mutate: impl FnOnce(&mut ScheduledTask),
    ) -> Result<Option<ScheduledTask>, TaskError> {
        let from = task.status;
        match self.state.transition(task, mutate).await? {
            Some(updated) => {
                self.counters.record(updated.status);
                debug!(task_id = %task.id, %from, to = %updated.status, "commit: transition committed");
                Ok(Some(updated))
            }
            None => {
                let current = self.state.get_task(&task.id).await?;
                info!(
                    task_id = %task.id,
                    %from,
                    current = ?current.map(|t| t.status),
                    "Task changed underneath us, yielding"
                );
                Ok(None)
            }
        }
    }

    /// Move a task to FAILED with `reason`
    ///
    /// TASK_FAILED is published while retries remain; the final failure is
    /// announced by escalation instead.
    pub async fn fail(&self, task: &ScheduledTask, reason: &str) -> Result<Option<ScheduledTask>, TaskError> {
        debug!(task_id = %task.id, %reason, "fail: called");
        let failed = self
            .commit(task, |t| {
                t.status = TaskStatus::Failed;
                t.error = Some(reason.to_string());
            })
            .await?;

        if let Some(ref failed) = failed {
            info!(
                task_id = %failed.id,
                retry_count = failed.retry_count,
                max_retries = failed.max_retries,
                %reason,
                "Task failed"
            );
            if retry::announces_failure(failed.retry_count, failed.max_retries) {
                self.publish(TaskEvent::TaskFailed {
                    task_id: failed.id.clone(),
                    reason: reason.to_string(),
                    retry_count: failed.retry_count,
                });
            }
        }
        Ok(failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskSpec;
    use crate::events::EventBus;

    async fn setup(max_retries: u32) -> (TaskWriter, Arc<EventBus>, ScheduledTask) {
        let state = StateManager::spawn_in_memory();
        let bus = Arc::new(EventBus::default());
        let writer = TaskWriter::new(state.clone(), bus.clone(), Arc::new(TransitionCounters::default()));
        let mut task = ScheduledTask::from_spec(TaskSpec::new("t", "* * * * *").with_max_retries(max_retries), None);
        task.status = TaskStatus::Running;
        state.create_task(task.clone()).await.unwrap();
        (writer, bus, task)
    }

    #[tokio::test]
    async fn test_fail_announces_while_retries_remain() {
        let (writer, bus, task) = setup(2).await;
        let mut rx = bus.subscribe();

        let failed = writer.fail(&task, "boom").await.unwrap().unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert_eq!(writer.counters().get(TaskStatus::Failed), 1);

        match rx.try_recv().unwrap() {
            TaskEvent::TaskFailed { retry_count, .. } => assert_eq!(retry_count, 0),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_last_failure_is_quiet() {
        let (writer, bus, task) = setup(0).await;
        let mut rx = bus.subscribe();

        writer.fail(&task, "boom").await.unwrap().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stale_commit_yields() {
        let (writer, _bus, task) = setup(2).await;
        writer.commit(&task, |t| t.status = TaskStatus::Failed).await.unwrap().unwrap();

        let again = writer.commit(&task, |t| t.status = TaskStatus::Completed).await.unwrap();
        assert!(again.is_none());
        assert_eq!(writer.counters().get(TaskStatus::Completed), 0);
    }
}
