//! Scheduler configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Main loop tick in milliseconds
    #[serde(rename = "tick-ms", default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Max tasks dispatched and not yet reaped
    #[serde(rename = "max-concurrent-tasks", default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    /// Inline retry backoff base in milliseconds
    #[serde(rename = "backoff-base-ms", default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Inline retry backoff cap in milliseconds
    #[serde(rename = "backoff-cap-ms", default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    /// Re-invocations allowed within one dispatch
    #[serde(rename = "inline-retry-limit", default = "default_inline_retry_limit")]
    pub inline_retry_limit: u32,

    /// How long shutdown waits for in-flight tasks before aborting them
    #[serde(rename = "shutdown-timeout-secs", default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_tick_ms() -> u64 {
    1_000
}

fn default_max_concurrent_tasks() -> usize {
    10
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_cap_ms() -> u64 {
    60_000
}

fn default_inline_retry_limit() -> u32 {
    1
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            inline_retry_limit: default_inline_retry_limit(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
