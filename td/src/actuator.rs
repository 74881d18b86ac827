//! Actuator - the opaque thing that performs a task's work
//!
//! The executor hands a task's `parameters` to an [`Actuator`] and records
//! whatever comes back. GUI drivers, platform adapters and the like live
//! behind this trait; two simple implementations ship here.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::debug;

/// Output kept from a command, per stream
const MAX_OUTPUT_CHARS: usize = 30_000;

#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("{0}")]
    Failed(String),
}

/// Performs one unit of work
///
/// Dropping the returned future must be safe: the executor drops it on timeout.
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn execute(&self, parameters: &Map<String, Value>) -> Result<Value, ActuatorError>;
}

/// Succeeds immediately, echoing the parameters back
#[derive(Debug, Default, Clone)]
pub struct NoopActuator;

#[async_trait]
impl Actuator for NoopActuator {
    async fn execute(&self, parameters: &Map<String, Value>) -> Result<Value, ActuatorError> {
        debug!(params = parameters.len(), "NoopActuator::execute: called");
        Ok(json!({ "echo": parameters }))
    }
}

/// Runs the `command` parameter through `sh -c`
///
/// An optional `cwd` parameter overrides the working directory. A non-zero
/// exit status is a failure.
#[derive(Debug, Default, Clone)]
pub struct CommandActuator {
    default_cwd: Option<PathBuf>,
}

impl CommandActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cwd(cwd: impl Into<PathBuf>) -> Self {
        Self {
            default_cwd: Some(cwd.into()),
        }
    }
}

fn truncate(mut text: String) -> String {
    if text.len() > MAX_OUTPUT_CHARS {
        let mut cut = MAX_OUTPUT_CHARS;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        let total = text.len();
        text.truncate(cut);
        text.push_str(&format!("...\n[truncated, {} bytes total]", total));
    }
    text
}

#[async_trait]
impl Actuator for CommandActuator {
    async fn execute(&self, parameters: &Map<String, Value>) -> Result<Value, ActuatorError> {
        let command = parameters
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| ActuatorError::InvalidParameters("command is required".to_string()))?;
        debug!(%command, "CommandActuator::execute: called");

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(command).kill_on_drop(true);
        let cwd = parameters
            .get("cwd")
            .and_then(Value::as_str)
            .map(PathBuf::from)
            .or_else(|| self.default_cwd.clone());
        if let Some(cwd) = cwd {
            debug!(cwd = %cwd.display(), "CommandActuator::execute: using working directory");
            cmd.current_dir(cwd);
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| ActuatorError::Failed(format!("Failed to execute command: {}", e)))?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = truncate(String::from_utf8_lossy(&output.stdout).into_owned());
        let stderr = truncate(String::from_utf8_lossy(&output.stderr).into_owned());
        debug!(exit_code, stdout_len = stdout.len(), stderr_len = stderr.len(), "CommandActuator::execute: completed");

        if output.status.success() {
            Ok(json!({ "exit_code": exit_code, "stdout": stdout, "stderr": stderr }))
        } else {
            let detail = if stderr.trim().is_empty() { stdout } else { stderr };
            Err(ActuatorError::Failed(format!("Exit code: {}\n{}", exit_code, detail.trim_end())))
        }
    }
}
