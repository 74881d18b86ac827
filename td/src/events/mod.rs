//! Task outcome events
//!
//! The scheduler, executor and recovery coordinator publish outcomes through
//! an [`EventSink`]. The daemon wires in an [`EventBus`] (tokio broadcast);
//! an [`EventLogger`] subscribes and keeps a JSONL history.
//!
//! ```rust,ignore
//! let bus = Arc::new(EventBus::with_default_capacity());
//! let logger = spawn_event_logger(&bus, data_dir.join(EVENT_LOG_FILE));
//!
//! let mut rx = bus.subscribe();
//! while let Ok(event) = rx.recv().await {
//!     println!("{}: {}", event.event_type(), event.task_id());
//! }
//! ```

mod bus;
mod logger;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventSink};
pub use logger::{EVENT_LOG_FILE, EventLogger, read_events, spawn_event_logger};
pub use types::{EventLogEntry, TaskEvent};
