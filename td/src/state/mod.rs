//! State management with actor pattern
//!
//! StateManager owns the task store and processes messages via channels,
//! providing thread-safe access to persistent state. Every mutation is a
//! compare-and-swap on `updated_at`.

mod manager;
mod messages;

pub use manager::StateManager;
pub use messages::{StateCommand, StateError, StateResponse};
