//! Recovery coordinator configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Seconds between sweeps
    #[serde(rename = "poll-interval-secs", default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Minimum time a task stays FAILED before a durable retry
    #[serde(rename = "retry-delay-secs", default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Busy tasks not updated for this long are treated as stuck
    #[serde(rename = "task-timeout-secs", default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    /// JSONL file escalations are appended to; unset disables the file
    #[serde(rename = "escalation-log", default)]
    pub escalation_log: Option<PathBuf>,
}

fn default_poll_interval_secs() -> u64 {
    300
}

fn default_retry_delay_secs() -> u64 {
    60
}

fn default_task_timeout_secs() -> u64 {
    600
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            retry_delay_secs: default_retry_delay_secs(),
            task_timeout_secs: default_task_timeout_secs(),
            escalation_log: None,
        }
    }
}

impl RecoveryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RecoveryConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(300));
        assert_eq!(config.retry_delay(), Duration::from_secs(60));
        assert_eq!(config.task_timeout(), Duration::from_secs(600));
        assert!(config.escalation_log.is_none());
    }

    #[test]
    fn test_yaml() {
        let config: RecoveryConfig =
            serde_yaml::from_str("retry-delay-secs: 5\nescalation-log: /tmp/esc.jsonl\n").unwrap();
        assert_eq!(config.retry_delay_secs, 5);
        assert_eq!(config.poll_interval_secs, 300);
        assert_eq!(config.escalation_log, Some(PathBuf::from("/tmp/esc.jsonl")));
    }
}
