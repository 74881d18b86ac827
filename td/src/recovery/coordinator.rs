//! Recovery coordinator
//!
//! Runs on its own clock, independent of the scheduler tick:
//! 1. failed sweep: durable retry (TASK_COMMAND) or escalation
//! 2. stuck sweep: busy tasks that went quiet are failed through the same
//!    path the executor uses
//!
//! The stuck sweep runs second, so a task it fails is only retried on a
//! later cycle.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use taskstore::now_ms;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::domain::{ScheduledTask, TaskRecord, TaskStatus};
use crate::error::TaskError;
use crate::events::TaskEvent;
use crate::retry::{self, RetryDecision};
use crate::scheduler::TaskWriter;

use super::config::RecoveryConfig;
use super::escalation::{EscalationLog, EscalationRecord};

/// Failure reason recorded by the stuck sweep
pub const STUCK_REASON: &str = "exceeded timeout threshold";

/// Something that can snapshot worker state when it has drifted
#[async_trait]
pub trait DriftCheck: Send + Sync {
    /// Create a recovery checkpoint if drift is detected; returns whether one was made
    async fn checkpoint_if_drifting(&self) -> Result<bool, TaskError>;
}

/// What one sweep did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub retried: usize,
    pub escalated: usize,
    /// Failed tasks still inside their retry delay
    pub waiting: usize,
    pub stalled: usize,
    /// Records that changed between listing and writing
    pub conflicts: usize,
    pub drift_checkpoint: bool,
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "examined: {}, retried: {}, escalated: {}, waiting: {}, stalled: {}, conflicts: {}",
            self.examined, self.retried, self.escalated, self.waiting, self.stalled, self.conflicts
        )
    }
}

pub struct RecoveryCoordinator {
    config: RecoveryConfig,
    writer: TaskWriter,
    escalations: EscalationLog,
    drift: Option<Arc<dyn DriftCheck>>,
}

fn elapsed_since(record: &TaskRecord, now_ms: i64) -> Duration {
    Duration::from_millis(u64::try_from(record.age_ms(now_ms)).unwrap_or(0))
}

impl RecoveryCoordinator {
    pub fn new(config: RecoveryConfig, writer: TaskWriter) -> Self {
        debug!(?config, "RecoveryCoordinator::new: called");
        let escalations = EscalationLog::new(config.escalation_log.clone());
        Self {
            config,
            writer,
            escalations,
            drift: None,
        }
    }

    /// Check for drift (and checkpoint) at the start of every sweep
    pub fn with_drift_check(mut self, drift: Arc<dyn DriftCheck>) -> Self {
        self.drift = Some(drift);
        self
    }

    /// Re-read a listed record; `None` if it is gone or no longer in `status`
    async fn fresh(&self, record: &TaskRecord, accept: impl Fn(TaskStatus) -> bool) -> Result<Option<ScheduledTask>, TaskError> {
        let task = self.writer.state().get_task(&record.task_id).await?;
        Ok(task.filter(|t| accept(t.status)))
    }

    /// One full recovery cycle
    pub async fn sweep(&self) -> Result<SweepReport, TaskError> {
        debug!("sweep: called");
        let mut report = SweepReport::default();

        if let Some(ref drift) = self.drift {
            match drift.checkpoint_if_drifting().await {
                Ok(taken) => report.drift_checkpoint = taken,
                Err(e) => warn!(error = %e, "Drift check failed"),
            }
        }

        let outcome = match self.sweep_failed(&mut report).await {
            Ok(()) => self.sweep_stuck(&mut report).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                info!(
                    examined = report.examined,
                    retried = report.retried,
                    escalated = report.escalated,
                    waiting = report.waiting,
                    stalled = report.stalled,
                    conflicts = report.conflicts,
                    drift_checkpoint = report.drift_checkpoint,
                    "Recovery sweep complete"
                );
                Ok(report)
            }
            Err(e) => {
                warn!(
                    examined = report.examined,
                    retried = report.retried,
                    escalated = report.escalated,
                    waiting = report.waiting,
                    stalled = report.stalled,
                    conflicts = report.conflicts,
                    drift_checkpoint = report.drift_checkpoint,
                    error = %e,
                    "Recovery sweep aborted"
                );
                Err(e)
            }
        }
    }

    async fn sweep_failed(&self, report: &mut SweepReport) -> Result<(), TaskError> {
        let records = self.writer.state().list_records(&[TaskStatus::Failed]).await?;
        let now = now_ms();
        debug!(count = records.len(), "sweep_failed: examining");

        for record in records {
            report.examined += 1;
            let decision = retry::decide(
                record.status,
                record.retry_count,
                record.max_retries,
                elapsed_since(&record, now),
                self.config.retry_delay(),
            );
            debug!(task_id = %record.task_id, ?decision, "sweep_failed: decided");

            match decision {
                RetryDecision::Retry => {
                    if self.retry(&record).await? {
                        report.retried += 1;
                    } else {
                        report.conflicts += 1;
                    }
                }
                RetryDecision::Escalate => {
                    if self.escalate(&record).await? {
                        report.escalated += 1;
                    } else {
                        report.conflicts += 1;
                    }
                }
                RetryDecision::Wait => report.waiting += 1,
                RetryDecision::Ignore => {}
            }
        }
        Ok(())
    }

    async fn retry(&self, record: &TaskRecord) -> Result<bool, TaskError> {
        let Some(task) = self.fresh(record, |s| s == TaskStatus::Failed).await? else {
            return Ok(false);
        };
        if !task.has_retries_left() {
            return Ok(false);
        }
        let Some(retried) = self
            .writer
            .commit(&task, |t| {
                t.status = TaskStatus::Pending;
                t.retry_count += 1;
                t.next_run = Some(Utc::now());
                t.new_correlation_id();
            })
            .await?
        else {
            return Ok(false);
        };

        info!(
            task_id = %retried.id,
            owner_id = %retried.owner_id,
            retry_count = retried.retry_count,
            correlation_id = ?retried.correlation_id,
            "Retrying failed task"
        );
        self.writer.publish(TaskEvent::command(&retried));
        Ok(true)
    }

    async fn escalate(&self, record: &TaskRecord) -> Result<bool, TaskError> {
        let Some(task) = self.fresh(record, |s| s == TaskStatus::Failed).await? else {
            return Ok(false);
        };
        // Budget restored since listing (a success reset retry_count)
        if task.has_retries_left() {
            return Ok(false);
        }
        let Some(escalated) = self
            .writer
            .commit(&task, |t| t.status = TaskStatus::PermanentlyFailed)
            .await?
        else {
            return Ok(false);
        };

        let reason = escalated
            .error
            .clone()
            .unwrap_or_else(|| "retries exhausted".to_string());
        self.writer.publish(TaskEvent::TaskPermanentlyFailed {
            task_id: escalated.id.clone(),
            reason: reason.clone(),
            total_retries: escalated.retry_count,
        });
        if let Err(e) = self
            .escalations
            .record(&EscalationRecord::new(&escalated, &reason))
            .await
        {
            warn!(task_id = %escalated.id, error = %e, "Failed to append escalation record");
        }
        Ok(true)
    }

    async fn sweep_stuck(&self, report: &mut SweepReport) -> Result<(), TaskError> {
        let records = self.writer.state().list_records(&TaskStatus::BUSY).await?;
        let now = now_ms();
        debug!(count = records.len(), "sweep_stuck: examining");

        for record in records {
            report.examined += 1;
            if !retry::is_stuck(record.status, elapsed_since(&record, now), self.config.task_timeout()) {
                continue;
            }
            warn!(
                task_id = %record.task_id,
                status = %record.status,
                idle_ms = record.age_ms(now),
                "Task stuck, failing it"
            );
            let Some(task) = self.fresh(&record, |s| s.is_busy()).await? else {
                report.conflicts += 1;
                continue;
            };
            match self.writer.fail(&task, STUCK_REASON).await? {
                Some(_) => report.stalled += 1,
                None => report.conflicts += 1,
            }
        }
        Ok(())
    }

    /// Sweep every poll interval until shutdown is signalled
    pub async fn run(&self, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(
            poll_interval_secs = self.config.poll_interval_secs,
            retry_delay_secs = self.config.retry_delay_secs,
            task_timeout_secs = self.config.task_timeout_secs,
            "Recovery coordinator starting"
        );
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sweep().await {
                        warn!(error = %e, "Recovery sweep failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Recovery coordinator shutdown signal received");
                    break;
                }
            }
        }
    }
}
