//! Event Logger - persists events to a JSONL file
//!
//! Subscribes to the EventBus and appends every event to `events.jsonl`
//! for history and debugging.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use super::bus::EventBus;
use super::types::{EventLogEntry, TaskEvent};

/// File name of the event log inside the data directory
pub const EVENT_LOG_FILE: &str = "events.jsonl";

/// Event logger that appends events to a JSONL file
pub struct EventLogger {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl EventLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        debug!(?path, "EventLogger::new: creating logger");
        Self { path, writer: None }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> eyre::Result<BufWriter<File>> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        Ok(BufWriter::new(file))
    }

    /// Append one event; the file is opened on first write
    pub fn write_event(&mut self, event: &TaskEvent) -> eyre::Result<()> {
        debug!(event_type = event.event_type(), task_id = event.task_id(), "EventLogger::write_event");
        if self.writer.is_none() {
            self.writer = Some(self.open()?);
        }
        if let Some(writer) = self.writer.as_mut() {
            let json = serde_json::to_string(&EventLogEntry::new(event.clone()))?;
            writeln!(writer, "{}", json)?;
            writer.flush()?;
        }
        Ok(())
    }

    /// Consume events until the bus is dropped
    pub async fn run(mut self, mut rx: broadcast::Receiver<TaskEvent>) {
        debug!(path = %self.path.display(), "EventLogger::run: starting event logger");
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Err(e) = self.write_event(&event) {
                        error!(task_id = event.task_id(), error = %e, "EventLogger: failed to write event");
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "EventLogger: lagged behind, missed events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("EventLogger: channel closed, shutting down");
                    break;
                }
            }
        }

        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush();
        }
    }
}

/// Read every parseable entry from an event log
pub fn read_events(path: impl AsRef<Path>) -> eyre::Result<Vec<EventLogEntry>> {
    let path = path.as_ref();
    debug!(?path, "read_events: reading log file");

    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path)?;
    let mut entries = Vec::new();
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        match serde_json::from_str::<EventLogEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(line, error = %e, "read_events: failed to parse line"),
        }
    }
    Ok(entries)
}

/// Subscribe now and log in the background
///
/// The subscription happens before the task is spawned, so nothing published
/// after this call returns is missed.
pub fn spawn_event_logger(bus: &EventBus, path: impl AsRef<Path>) -> tokio::task::JoinHandle<()> {
    let rx = bus.subscribe();
    let logger = EventLogger::new(path);
    tokio::spawn(logger.run(rx))
}
