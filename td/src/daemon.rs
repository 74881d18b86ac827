//! Daemon assembly
//!
//! One store, one event bus, and the components wired to them: scheduler,
//! recovery coordinator and worker. The daemon owns the store's lifetime;
//! components only ever see the cloneable `StateManager` handle.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use checkpointstore::CheckpointManager;
use eyre::{Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::actuator::{Actuator, CommandActuator};
use crate::config::{Config, StorageBackend};
use crate::events::{EventBus, EventSink, spawn_event_logger};
use crate::recovery::RecoveryCoordinator;
use crate::scheduler::{Scheduler, TransitionCounters};
use crate::state::StateManager;
use crate::worker::Worker;

/// How long shutdown waits for the event logger to drain
const EVENT_LOGGER_DRAIN: Duration = Duration::from_secs(2);

pub struct Daemon {
    config: Config,
    state: StateManager,
    bus: Arc<EventBus>,
    scheduler: Arc<Scheduler>,
    recovery: Arc<RecoveryCoordinator>,
    worker: Arc<Worker>,
    event_logger: JoinHandle<()>,
}

impl Daemon {
    /// Open the store and wire every component, with shell commands as the actuator
    pub fn open(config: Config) -> Result<Self> {
        Self::with_actuator(config, Arc::new(CommandActuator::new()))
    }

    pub fn with_actuator(mut config: Config, actuator: Arc<dyn Actuator>) -> Result<Self> {
        debug!(data_dir = %config.storage.data_dir.display(), backend = ?config.storage.backend, "Daemon::with_actuator: called");
        std::fs::create_dir_all(&config.storage.data_dir).context(format!(
            "Failed to create data directory {}",
            config.storage.data_dir.display()
        ))?;

        let state = match config.storage.backend {
            StorageBackend::Sqlite => StateManager::spawn(config.storage.data_dir.join("store"))
                .context("Failed to open task store")?,
            StorageBackend::Memory => StateManager::spawn_in_memory(),
        };

        let bus = Arc::new(EventBus::with_default_capacity());
        let event_logger = spawn_event_logger(&bus, config.storage.events_path());
        let sink: Arc<dyn EventSink> = bus.clone();

        let counters = Arc::new(TransitionCounters::default());
        let scheduler = Arc::new(Scheduler::with_counters(
            config.scheduler.clone(),
            state.clone(),
            actuator,
            sink,
            counters,
        ));

        let checkpoints = CheckpointManager::new(config.worker.owner_id.clone(), &config.checkpoints)?;
        let worker = Arc::new(Worker::new(state.clone(), checkpoints));

        if config.recovery.escalation_log.is_none() {
            config.recovery.escalation_log = Some(config.storage.escalations_path());
        }
        let recovery = Arc::new(
            RecoveryCoordinator::new(config.recovery.clone(), scheduler.writer().clone())
                .with_drift_check(worker.clone()),
        );

        info!(
            owner_id = %config.worker.owner_id,
            data_dir = %config.storage.data_dir.display(),
            "Daemon assembled"
        );
        Ok(Self {
            config,
            state,
            bus,
            scheduler,
            recovery,
            worker,
            event_logger,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn recovery(&self) -> &RecoveryCoordinator {
        &self.recovery
    }

    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    /// Run every loop in the foreground until Ctrl-C, then close
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
            }
        })
        .await
    }

    /// Run every loop until `stop` resolves, then close
    pub async fn run_until(self, stop: impl Future<Output = ()>) -> Result<()> {
        let mut loops: Vec<(mpsc::Sender<()>, JoinHandle<()>)> = Vec::new();

        let (tx, rx) = mpsc::channel(1);
        let scheduler = self.scheduler.clone();
        loops.push((tx, tokio::spawn(async move { scheduler.run(rx).await })));

        let (tx, rx) = mpsc::channel(1);
        let recovery = self.recovery.clone();
        loops.push((tx, tokio::spawn(async move { recovery.run(rx).await })));

        match self.config.worker.checkpoint_interval() {
            Some(every) => {
                let (tx, rx) = mpsc::channel(1);
                loops.push((tx, tokio::spawn(self.worker.clone().run_checkpoints(every, rx))));
            }
            None => info!("Routine checkpoints disabled"),
        }

        info!("Daemon running. Press Ctrl+C to stop.");
        stop.await;
        info!("Daemon shutting down...");

        for (tx, _) in &loops {
            let _ = tx.send(()).await;
        }
        for (_, handle) in loops {
            if let Err(e) = handle.await {
                warn!(error = %e, "Daemon loop ended abnormally");
            }
        }

        self.close().await
    }

    /// Close the store and let the event logger drain
    pub async fn close(self) -> Result<()> {
        debug!("Daemon::close: called");
        let Self {
            state,
            bus,
            scheduler,
            recovery,
            worker,
            mut event_logger,
            ..
        } = self;

        let closed = state.shutdown().await;

        // The logger stops once every bus handle is gone
        drop((bus, scheduler, recovery, worker));
        if tokio::time::timeout(EVENT_LOGGER_DRAIN, &mut event_logger).await.is_err() {
            warn!("Event logger did not drain in time");
            event_logger.abort();
        }

        closed.map_err(|e| eyre::eyre!("Failed to close task store: {}", e))?;
        info!("Daemon stopped");
        Ok(())
    }
}
