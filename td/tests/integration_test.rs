//! Integration tests for taskd
//!
//! Scheduler, executor and recovery coordinator wired over one in-memory
//! store, the way the daemon wires them.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use checkpointstore::{CheckpointKind, CheckpointManager, WorkerState};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Map, Value, json};
use tempfile::TempDir;
use tokio::sync::broadcast;

use taskd::actuator::{Actuator, ActuatorError};
use taskd::domain::{TaskSpec, TaskStatus};
use taskd::error::TaskError;
use taskd::events::{EventBus, TaskEvent};
use taskd::recovery::{RecoveryConfig, RecoveryCoordinator, STUCK_REASON};
use taskd::scheduler::{Scheduler, SchedulerConfig};
use taskd::state::StateManager;
use taskd::worker::Worker;

// =============================================================================
// Harness
// =============================================================================

struct AlwaysFails;

#[async_trait]
impl Actuator for AlwaysFails {
    async fn execute(&self, _parameters: &Map<String, Value>) -> Result<Value, ActuatorError> {
        Err(ActuatorError::Failed("upstream unavailable".to_string()))
    }
}

/// Never returns on its own
struct Hangs;

#[async_trait]
impl Actuator for Hangs {
    async fn execute(&self, _parameters: &Map<String, Value>) -> Result<Value, ActuatorError> {
        std::future::pending::<()>().await;
        Ok(Value::Null)
    }
}

struct Engine {
    state: StateManager,
    scheduler: Scheduler,
    recovery: RecoveryCoordinator,
    rx: broadcast::Receiver<TaskEvent>,
}

fn engine(actuator: impl Actuator + 'static, scheduler: SchedulerConfig, recovery: RecoveryConfig) -> Engine {
    let state = StateManager::spawn_in_memory();
    let bus = Arc::new(EventBus::default());
    let rx = bus.subscribe();
    let scheduler = Scheduler::new(scheduler, state.clone(), Arc::new(actuator), bus);
    let recovery = RecoveryCoordinator::new(recovery, scheduler.writer().clone());
    Engine {
        state,
        scheduler,
        recovery,
        rx,
    }
}

fn fast_scheduler() -> SchedulerConfig {
    SchedulerConfig {
        backoff_base_ms: 1,
        backoff_cap_ms: 5,
        ..Default::default()
    }
}

fn immediate_recovery() -> RecoveryConfig {
    RecoveryConfig {
        retry_delay_secs: 0,
        ..Default::default()
    }
}

fn drain(rx: &mut broadcast::Receiver<TaskEvent>) -> Vec<TaskEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

fn count(events: &[TaskEvent], event_type: &str) -> usize {
    events.iter().filter(|e| e.event_type() == event_type).count()
}

// =============================================================================
// Retry ladder
// =============================================================================

#[tokio::test]
async fn test_daily_sync_exhausts_retries_then_escalates_once() {
    let mut e = engine(AlwaysFails, fast_scheduler(), immediate_recovery());
    let id = e
        .scheduler
        .add_task(TaskSpec::new("daily-sync", "0 2 * * *").with_max_retries(2))
        .await
        .unwrap();
    assert!(e.scheduler.run_now(&id).await.unwrap());

    // Dispatch: fails, retries inline once, fails again
    assert_eq!(e.scheduler.tick().await.unwrap(), 1);
    e.scheduler.wait_for_idle().await;
    let task = e.scheduler.get_task(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 1);

    // Durable retry makes it due again
    let report = e.recovery.sweep().await.unwrap();
    assert_eq!(report.retried, 1);
    let task = e.scheduler.get_task(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.retry_count, 2);

    // Third failure leaves no budget for an inline retry
    assert_eq!(e.scheduler.tick().await.unwrap(), 1);
    e.scheduler.wait_for_idle().await;
    assert_eq!(e.scheduler.get_task(&id).await.unwrap().status, TaskStatus::Failed);

    let report = e.recovery.sweep().await.unwrap();
    assert_eq!(report.escalated, 1);

    // Terminal: further sweeps and ticks do nothing
    let report = e.recovery.sweep().await.unwrap();
    assert_eq!(report.retried + report.escalated, 0);
    assert_eq!(e.scheduler.tick().await.unwrap(), 0);

    let task = e.scheduler.get_task(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::PermanentlyFailed);
    assert_eq!(task.retry_count, 2);

    let events = drain(&mut e.rx);
    assert_eq!(count(&events, "TASK_FAILED"), 2);
    assert_eq!(count(&events, "TASK_COMMAND"), 1);
    assert_eq!(count(&events, "TASK_PERMANENTLY_FAILED"), 1);
    match events.last() {
        Some(TaskEvent::TaskPermanentlyFailed {
            task_id,
            reason,
            total_retries,
        }) => {
            assert_eq!(task_id, &id);
            assert_eq!(*total_retries, 2);
            assert!(reason.contains("upstream unavailable"));
        }
        other => panic!("unexpected last event {other:?}"),
    }

    let stats = e.scheduler.stats().await.unwrap();
    assert_eq!(stats.escalations, 1);
    assert_eq!(stats.count(TaskStatus::PermanentlyFailed), 1);
}

#[tokio::test]
async fn test_invalid_rule_leaves_store_unchanged() {
    let e = engine(AlwaysFails, fast_scheduler(), immediate_recovery());
    e.scheduler
        .add_task(TaskSpec::new("ok", "*/5 * * * *"))
        .await
        .unwrap();

    let err = e
        .scheduler
        .add_task(TaskSpec::new("broken", "not-a-cron"))
        .await
        .unwrap_err();
    assert!(matches!(err, TaskError::Validation(_)));

    let err = e.scheduler.add_task(TaskSpec::new("", "* * * * *")).await.unwrap_err();
    assert!(matches!(err, TaskError::Validation(_)));

    let tasks = e.state.list_tasks(None, None).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].name, "ok");
}

// =============================================================================
// Stall recovery
// =============================================================================

#[tokio::test]
async fn test_hung_run_is_failed_by_sweep_and_not_double_dispatched() {
    let recovery = RecoveryConfig {
        retry_delay_secs: 0,
        task_timeout_secs: 0,
        ..Default::default()
    };
    let mut e = engine(Hangs, fast_scheduler(), recovery);
    let id = e
        .scheduler
        .add_task(TaskSpec::new("hangs", "0 2 * * *"))
        .await
        .unwrap();
    e.scheduler.run_now(&id).await.unwrap();
    assert_eq!(e.scheduler.tick().await.unwrap(), 1);

    let first = e.recovery.sweep().await.unwrap();
    assert_eq!(first.stalled, 1);
    assert_eq!(first.retried, 0);
    let task = e.scheduler.get_task(&id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_deref(), Some(STUCK_REASON));

    let second = e.recovery.sweep().await.unwrap();
    assert_eq!(second.retried, 1);
    assert_eq!(e.scheduler.get_task(&id).await.unwrap().status, TaskStatus::Pending);

    // Due again, but the hung run still holds the slot
    assert_eq!(e.scheduler.tick().await.unwrap(), 0);
    assert_eq!(e.scheduler.running_count().await, 1);

    assert!(e.scheduler.remove_task(&id).await.unwrap());
    assert_eq!(e.scheduler.running_count().await, 0);

    let types: Vec<_> = drain(&mut e.rx).iter().map(|ev| ev.event_type()).collect();
    assert_eq!(types, ["TASK_FAILED", "TASK_COMMAND"]);
}

// =============================================================================
// Concurrency bound
// =============================================================================

/// Sleeps a seeded random latency and records how many calls overlap
struct Jittery {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
    seed: u64,
}

#[async_trait]
impl Actuator for Jittery {
    async fn execute(&self, _parameters: &Map<String, Value>) -> Result<Value, ActuatorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) as u64;
        let latency = StdRng::seed_from_u64(self.seed.wrapping_add(call)).random_range(0..15u64);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(latency)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(json!({ "latency_ms": latency }))
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_never_more_than_max_concurrent_running(
        max_concurrent in 1usize..4,
        tasks in 1usize..12,
        seed in any::<u64>(),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let actuator = Arc::new(Jittery {
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
                seed,
            });
            let state = StateManager::spawn_in_memory();
            let config = SchedulerConfig {
                max_concurrent_tasks: max_concurrent,
                ..fast_scheduler()
            };
            let scheduler = Scheduler::new(config, state.clone(), actuator.clone(), Arc::new(EventBus::default()));

            for i in 0..tasks {
                let id = scheduler
                    .add_task(TaskSpec::new(format!("job {i}"), "0 2 * * *").with_priority((i % 3) as i32))
                    .await
                    .unwrap();
                scheduler.run_now(&id).await.unwrap();
            }

            for _ in 0..1_000 {
                scheduler.tick().await.unwrap();
                let counts = state.status_counts().await.unwrap();
                let busy: usize = TaskStatus::BUSY.iter().map(|s| counts.get(s).copied().unwrap_or(0)).sum();
                assert!(busy <= max_concurrent, "{busy} busy with limit {max_concurrent}");
                assert!(scheduler.running_count().await <= max_concurrent);

                if actuator.calls.load(Ordering::SeqCst) == tasks && scheduler.running_count().await == 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            scheduler.wait_for_idle().await;

            assert_eq!(actuator.calls.load(Ordering::SeqCst), tasks);
            assert!(actuator.max_in_flight.load(Ordering::SeqCst) <= max_concurrent);
            let pending = state.list_tasks(Some(TaskStatus::Pending), None).await.unwrap();
            assert_eq!(pending.len(), tasks);
        });
    }
}

// =============================================================================
// Checkpoints
// =============================================================================

#[tokio::test]
async fn test_worker_checkpoint_round_trip_and_retention() {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let config = checkpointstore::Config::at(temp.path());
    let state = StateManager::spawn_in_memory();
    let worker = Worker::new(state.clone(), CheckpointManager::new("worker-1", &config).unwrap());

    state
        .create_task(taskd::domain::ScheduledTask::from_spec(
            TaskSpec::new("digest", "0 8 * * *").with_owner("worker-1"),
            None,
        ))
        .await
        .unwrap();
    worker
        .update_live(|s| {
            s.memory.insert("summary".to_string(), json!("three open incidents"));
        })
        .await;

    let mut refs = Vec::new();
    for _ in 0..5 {
        refs.push(worker.create_checkpoint(CheckpointKind::Routine).await.unwrap());
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    let snapshot: WorkerState = worker.live_state().await;

    let kept = worker.list_checkpoints(Some(CheckpointKind::Routine)).await.unwrap();
    assert_eq!(kept.len(), 3);
    let newest: Vec<_> = refs[2..].iter().map(|r| r.created_at).collect();
    let mut kept_times: Vec<_> = kept.iter().map(|r| r.created_at).collect();
    kept_times.sort();
    assert_eq!(kept_times, newest);

    worker
        .update_live(|s| {
            s.memory.clear();
            s.current_task = Some(json!({"task_id": "bogus"}));
        })
        .await;

    let latest = worker
        .latest_checkpoint(CheckpointKind::Routine)
        .await
        .unwrap()
        .expect("latest routine checkpoint");
    assert_eq!(latest, refs[4]);
    worker.restore_checkpoint(&latest).await.unwrap();
    assert_eq!(worker.live_state().await, snapshot);
}
