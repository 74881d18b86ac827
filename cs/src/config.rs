//! Configuration for checkpointstore

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Primary checkpoint root
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Used when a write to the primary root fails
    #[serde(default = "default_fallback_path")]
    pub fallback_path: Option<PathBuf>,

    #[serde(default)]
    pub retention: RetentionPolicy,
}

/// Per-kind retention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetentionPolicy {
    /// Routine checkpoints kept per owner
    #[serde(default = "default_keep_routine")]
    pub keep_routine: usize,

    /// Pre-operation and recovery checkpoints older than this are pruned
    #[serde(default = "default_max_age_days")]
    pub max_age_days: i64,
}

fn default_store_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("checkpointstore")
}

fn default_fallback_path() -> Option<PathBuf> {
    Some(std::env::temp_dir().join("checkpointstore"))
}

fn default_keep_routine() -> usize {
    crate::DEFAULT_KEEP_ROUTINE
}

fn default_max_age_days() -> i64 {
    crate::DEFAULT_MAX_AGE_DAYS
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_routine: default_keep_routine(),
            max_age_days: default_max_age_days(),
        }
    }
}

impl RetentionPolicy {
    pub fn max_age(&self) -> chrono::Duration {
        chrono::Duration::days(self.max_age_days)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            fallback_path: default_fallback_path(),
            retention: RetentionPolicy::default(),
        }
    }
}

impl Config {
    /// Config rooted at `store_path` with no fallback
    pub fn at(store_path: impl Into<PathBuf>) -> Self {
        Self {
            store_path: store_path.into(),
            fallback_path: None,
            retention: RetentionPolicy::default(),
        }
    }

    /// Load config from file, or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        if let Some(config_path) = path {
            return Self::load_from_file(config_path);
        }

        // Try default locations
        let default_paths = [
            dirs::config_dir().map(|p| p.join("checkpointstore").join("config.yml")),
            Some(PathBuf::from("checkpointstore.yml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                return Self::load_from_file(path);
            }
        }

        Ok(Config::default())
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).context(format!("Failed to read config file: {}", path.display()))?;
        serde_yaml::from_str(&content).context(format!("Failed to parse config file: {}", path.display()))
    }
}
