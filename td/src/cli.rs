//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

/// taskd - cron-scheduled task orchestration with bounded retry and recovery
#[derive(Parser)]
#[command(
    name = "td",
    about = "Schedule recurring tasks, retry failures and recover stalled work",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run scheduler, recovery and checkpoints in the foreground until Ctrl-C
    Run,

    /// Register a new task
    Add {
        /// Task name
        name: String,

        /// 5-field cron expression, e.g. "0 2 * * *"
        rule: String,

        /// Owning worker
        #[arg(short, long)]
        owner: Option<String>,

        /// Dispatch priority (higher first)
        #[arg(short, long, default_value_t = 0, allow_negative_numbers = true)]
        priority: i32,

        /// Per-attempt timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Durable retries before escalation
        #[arg(short = 'r', long)]
        max_retries: Option<u32>,

        /// Actuator parameter as key=value (repeatable)
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Complete after the first successful run instead of rescheduling
        #[arg(long)]
        one_shot: bool,
    },

    /// List tasks
    List {
        /// Only tasks in this status
        #[arg(short, long)]
        status: Option<String>,

        /// Only tasks with this tag
        #[arg(short, long)]
        tag: Option<String>,
    },

    /// Show one task
    Show {
        /// Task ID (or partial)
        id: String,
    },

    /// Pause a pending task
    Pause {
        /// Task ID (or partial)
        id: String,
    },

    /// Resume a paused task
    Resume {
        /// Task ID (or partial)
        id: String,
    },

    /// Delete a task
    Remove {
        /// Task ID (or partial)
        id: String,
    },

    /// Make a pending task due immediately
    RunNow {
        /// Task ID (or partial)
        id: String,
    },

    /// Task counts and transition totals
    Stats,

    /// Run one recovery sweep
    Sweep,

    /// Worker checkpoints
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommand,
    },
}

/// Checkpoint subcommands
#[derive(Debug, Subcommand)]
pub enum CheckpointCommand {
    /// Snapshot the worker's live state
    Create {
        /// routine, pre_operation or recovery
        #[arg(short, long, default_value = "routine")]
        kind: String,
    },

    /// Restore the latest checkpoint of a kind
    Restore {
        #[arg(short, long, default_value = "routine")]
        kind: String,
    },

    /// Show the latest checkpoint of a kind
    Latest {
        #[arg(short, long, default_value = "routine")]
        kind: String,
    },
}

/// Split `key=value`; JSON objects and arrays stay structured, everything else is a string
pub fn parse_param(raw: &str) -> Result<(String, serde_json::Value), String> {
    debug!(%raw, "parse_param: called");
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("Invalid parameter '{}': expected KEY=VALUE", raw))?;
    if key.is_empty() {
        return Err(format!("Invalid parameter '{}': empty key", raw));
    }
    let value = if value.starts_with('{') || value.starts_with('[') {
        serde_json::from_str(value).map_err(|e| format!("Invalid parameter '{}': {}", raw, e))?
    } else {
        serde_json::Value::String(value.to_string())
    };
    Ok((key.to_string(), value))
}

/// Output format for query commands
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::parse_from(["td", "run"]);
        assert!(matches!(cli.command, Command::Run));
        assert_eq!(cli.format, OutputFormat::Text);
    }

    #[test]
    fn test_cli_parse_add() {
        let cli = Cli::parse_from([
            "td",
            "add",
            "daily-sync",
            "0 2 * * *",
            "--owner",
            "worker-1",
            "--priority",
            "-5",
            "--max-retries",
            "2",
            "--param",
            "command=true",
            "--tag",
            "nightly",
            "--one-shot",
        ]);
        match cli.command {
            Command::Add {
                name,
                rule,
                owner,
                priority,
                max_retries,
                params,
                tags,
                one_shot,
                timeout,
            } => {
                assert_eq!(name, "daily-sync");
                assert_eq!(rule, "0 2 * * *");
                assert_eq!(owner.as_deref(), Some("worker-1"));
                assert_eq!(priority, -5);
                assert_eq!(max_retries, Some(2));
                assert_eq!(params, vec!["command=true"]);
                assert_eq!(tags, vec!["nightly"]);
                assert!(one_shot);
                assert_eq!(timeout, None);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_parse_checkpoint() {
        let cli = Cli::parse_from(["td", "--format", "json", "checkpoint", "latest", "--kind", "recovery"]);
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(matches!(
            cli.command,
            Command::Checkpoint {
                command: CheckpointCommand::Latest { ref kind }
            } if kind == "recovery"
        ));
    }

    #[test]
    fn test_cli_with_config() {
        let cli = Cli::parse_from(["td", "-c", "/path/to/taskd.yml", "stats"]);
        assert_eq!(cli.config, Some(PathBuf::from("/path/to/taskd.yml")));
    }

    #[test]
    fn test_parse_param() {
        assert_eq!(parse_param("command=echo hi").unwrap(), ("command".to_string(), json!("echo hi")));
        assert_eq!(parse_param("command=true").unwrap(), ("command".to_string(), json!("true")));
        assert_eq!(parse_param("env={\"A\": 1}").unwrap(), ("env".to_string(), json!({"A": 1})));
        assert!(parse_param("env={broken").is_err());
        assert_eq!(parse_param("empty=").unwrap(), ("empty".to_string(), json!("")));
        assert!(parse_param("no-equals").is_err());
        assert!(parse_param("=value").is_err());
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("json".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert_eq!("TEXT".parse::<OutputFormat>(), Ok(OutputFormat::Text));
        assert!("table".parse::<OutputFormat>().is_err());
    }
}
