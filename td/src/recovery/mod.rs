//! Recovery coordinator
//!
//! Periodic sweep that turns durable failures into retries or escalations
//! and converts silently stalled tasks into ordinary failures.

mod config;
mod coordinator;
mod escalation;

pub use config::RecoveryConfig;
pub use coordinator::{DriftCheck, RecoveryCoordinator, STUCK_REASON, SweepReport};
pub use escalation::{EscalationLog, EscalationRecord, read_escalations};
