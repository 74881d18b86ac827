//! Daemon configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::DEFAULT_OWNER;
use crate::recovery::RecoveryConfig;
use crate::scheduler::SchedulerConfig;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (overridden by --log-level)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Worker identity and checkpoint cadence
    pub worker: WorkerConfig,

    /// Dispatch and inline retry
    pub scheduler: SchedulerConfig,

    /// Durable retry, escalation and stall detection
    pub recovery: RecoveryConfig,

    /// Task store location and backend
    pub storage: StorageConfig,

    /// Checkpoint roots and retention
    pub checkpoints: checkpointstore::Config,
}

impl Config {
    /// Load configuration with fallback chain
    ///
    /// Priority:
    /// 1. Explicit path (if provided)
    /// 2. Project-local: .taskd.yml
    /// 3. User config: ~/.config/taskd/taskd.yml
    /// 4. Defaults
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        for candidate in Self::default_paths() {
            if candidate.exists() {
                match Self::load_from_file(&candidate) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", candidate.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only `log-level`, before logging is set up
    ///
    /// Errors are swallowed; the full load afterwards reports them.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let paths = match config_path {
            Some(path) => vec![path.clone()],
            None => Self::default_paths(),
        };
        paths
            .iter()
            .filter(|p| p.exists())
            .find_map(|p| Self::load_from_file(p).ok())
            .and_then(|c| c.log_level)
    }

    fn default_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(".taskd.yml")];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("taskd").join("taskd.yml"));
        }
        paths
    }

    /// Checks serde cannot express
    pub fn validate(&self) -> Result<()> {
        checkpointstore::validate_owner_id(&self.worker.owner_id).context("Invalid worker owner-id")?;
        Ok(())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Worker identity and checkpoint cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Owner id this daemon checkpoints as
    #[serde(rename = "owner-id", default = "default_owner_id")]
    pub owner_id: String,

    /// Seconds between routine checkpoints (0 disables)
    #[serde(rename = "checkpoint-interval-secs", default = "default_checkpoint_interval_secs")]
    pub checkpoint_interval_secs: u64,
}

fn default_owner_id() -> String {
    DEFAULT_OWNER.to_string()
}

fn default_checkpoint_interval_secs() -> u64 {
    900
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            owner_id: default_owner_id(),
            checkpoint_interval_secs: default_checkpoint_interval_secs(),
        }
    }
}

impl WorkerConfig {
    pub fn checkpoint_interval(&self) -> Option<Duration> {
        (self.checkpoint_interval_secs > 0).then(|| Duration::from_secs(self.checkpoint_interval_secs))
    }
}

/// Task store backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Task store, event log and escalation log live here
    #[serde(rename = "data-dir", default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    // XDG data directory (~/.local/share/taskd on Linux)
    dirs::data_local_dir()
        .map(|d| d.join("taskd"))
        .unwrap_or_else(|| PathBuf::from(".taskd"))
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            data_dir: default_data_dir(),
        }
    }
}

impl StorageConfig {
    pub fn events_path(&self) -> PathBuf {
        self.data_dir.join(crate::events::EVENT_LOG_FILE)
    }

    pub fn escalations_path(&self) -> PathBuf {
        self.data_dir.join("escalations.jsonl")
    }
}
