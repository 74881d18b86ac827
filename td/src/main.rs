//! td - task orchestration daemon and its management commands

use std::fs;
use std::path::PathBuf;

use checkpointstore::{CheckpointKind, CheckpointRef};
use clap::Parser;
use colored::{ColoredString, Colorize};
use eyre::{Context, Result, bail, eyre};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use taskd::cli::{CheckpointCommand, Cli, Command, OutputFormat, parse_param};
use taskd::config::Config;
use taskd::daemon::Daemon;
use taskd::domain::{ScheduledTask, TaskSpec, TaskStatus, resolve_id};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskd")
        .join("logs");
    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level).map(|s| s.to_uppercase()) {
        None => tracing::Level::INFO,
        Some(s) => match s.as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
    };

    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("taskd.log"))
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

fn status_colored(status: TaskStatus) -> ColoredString {
    let s = status.as_str();
    match status {
        TaskStatus::Pending => s.normal(),
        TaskStatus::Running | TaskStatus::Injecting | TaskStatus::AwaitingResponse => s.cyan(),
        TaskStatus::Completed => s.green(),
        TaskStatus::Failed => s.yellow(),
        TaskStatus::PermanentlyFailed => s.red().bold(),
        TaskStatus::Paused => s.dimmed(),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_task_line(task: &ScheduledTask) {
    let next = task
        .next_run
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{:40} {:18} {:14} next: {}  retries: {}/{}",
        task.id.bold(),
        status_colored(task.status),
        task.recurrence_rule,
        next,
        task.retry_count,
        task.max_retries
    );
}

fn print_task(task: &ScheduledTask) {
    println!("{}  {}", task.id.bold(), status_colored(task.status));
    println!("  name:        {}", task.name);
    println!("  owner:       {}", task.owner_id);
    println!("  rule:        {}{}", task.recurrence_rule, if task.one_shot { " (one-shot)" } else { "" });
    println!("  priority:    {}", task.priority);
    println!("  retries:     {}/{}", task.retry_count, task.max_retries);
    if let Some(timeout) = task.timeout_seconds {
        println!("  timeout:     {}s", timeout);
    }
    if let Some(next) = task.next_run {
        println!("  next run:    {}", next.to_rfc3339());
    }
    if let Some(last) = task.last_run {
        println!("  last run:    {}", last.to_rfc3339());
    }
    if !task.tags.is_empty() {
        let tags: Vec<&str> = task.tags.iter().map(String::as_str).collect();
        println!("  tags:        {}", tags.join(", "));
    }
    if !task.parameters.is_empty() {
        println!("  parameters:  {}", serde_json::Value::Object(task.parameters.clone()));
    }
    if let Some(ref error) = task.error {
        println!("  error:       {}", error.red());
    }
    if let Some(ref result) = task.result {
        println!("  result:      {}", result);
    }
}

fn checkpoint_json(r: &CheckpointRef) -> serde_json::Value {
    json!({
        "owner_id": r.owner_id,
        "kind": r.kind,
        "created_at": r.created_at,
        "path": r.path,
    })
}

fn print_checkpoint(r: &CheckpointRef) {
    println!(
        "{} {} {}",
        r.kind.to_string().cyan(),
        r.created_at.to_rfc3339(),
        r.path.display().to_string().dimmed()
    );
}

/// Full ID for a reference typed on the command line
async fn resolve(daemon: &Daemon, reference: &str) -> Result<String> {
    let tasks = daemon.scheduler().list_tasks(None, None).await?;
    match resolve_id(tasks.iter().map(|t| t.id.as_str()), reference) {
        Ok(Some(id)) => Ok(id),
        Ok(None) => bail!("No task matches '{}'", reference),
        Err(candidates) => bail!("'{}' is ambiguous: {}", reference, candidates.join(", ")),
    }
}

fn report(done: bool, id: &str, verb: &str, reason: &str) {
    if done {
        println!("{} {} {}", "✓".green(), verb, id);
    } else {
        println!("{} {} not {}: {}", "✗".yellow(), id, verb.to_lowercase(), reason);
    }
}

async fn handle_checkpoint(daemon: &Daemon, command: CheckpointCommand, format: OutputFormat) -> Result<()> {
    let worker = daemon.worker();
    match command {
        CheckpointCommand::Create { kind } => {
            let kind: CheckpointKind = kind.parse().map_err(|e: String| eyre!(e))?;
            let r = worker.create_checkpoint(kind).await?;
            match format {
                OutputFormat::Json => print_json(&checkpoint_json(&r))?,
                OutputFormat::Text => print_checkpoint(&r),
            }
        }
        CheckpointCommand::Restore { kind } => {
            let kind: CheckpointKind = kind.parse().map_err(|e: String| eyre!(e))?;
            let Some(r) = worker.latest_checkpoint(kind).await? else {
                bail!("No {} checkpoint for {}", kind, worker.owner_id());
            };
            worker.restore_checkpoint(&r).await?;
            match format {
                OutputFormat::Json => print_json(&json!({
                    "restored": checkpoint_json(&r),
                    "state": worker.live_state().await,
                }))?,
                OutputFormat::Text => {
                    print!("{} restored ", "✓".green());
                    print_checkpoint(&r);
                }
            }
        }
        CheckpointCommand::Latest { kind } => {
            let kind: CheckpointKind = kind.parse().map_err(|e: String| eyre!(e))?;
            let latest = worker.latest_checkpoint(kind).await?;
            match (format, latest) {
                (OutputFormat::Json, latest) => print_json(&latest.as_ref().map(checkpoint_json))?,
                (OutputFormat::Text, Some(r)) => print_checkpoint(&r),
                (OutputFormat::Text, None) => println!("No {} checkpoint for {}", kind, worker.owner_id()),
            }
        }
    }
    Ok(())
}

async fn handle(daemon: &Daemon, command: Command, format: OutputFormat) -> Result<()> {
    debug!(?command, "handle: called");
    let scheduler = daemon.scheduler();
    match command {
        Command::Run => bail!("run is not a management command"),
        Command::Add {
            name,
            rule,
            owner,
            priority,
            timeout,
            max_retries,
            params,
            tags,
            one_shot,
        } => {
            let mut spec = TaskSpec::new(name, rule).with_priority(priority);
            if let Some(owner) = owner {
                spec = spec.with_owner(owner);
            }
            if let Some(timeout) = timeout {
                spec = spec.with_timeout(timeout);
            }
            if let Some(max_retries) = max_retries {
                spec = spec.with_max_retries(max_retries);
            }
            for raw in params {
                let (key, value) = parse_param(&raw).map_err(|e| eyre!(e))?;
                spec = spec.with_parameter(key, value);
            }
            for tag in tags {
                spec = spec.with_tag(tag);
            }
            if one_shot {
                spec = spec.one_shot();
            }
            let id = scheduler.add_task(spec).await?;
            match format {
                OutputFormat::Json => print_json(&json!({ "task_id": id }))?,
                OutputFormat::Text => println!("{} Added {}", "✓".green(), id.bold()),
            }
        }
        Command::List { status, tag } => {
            let status = status
                .map(|s| s.parse::<TaskStatus>())
                .transpose()
                .map_err(|e| eyre!(e))?;
            let tasks = scheduler.list_tasks(status, tag.as_deref()).await?;
            match format {
                OutputFormat::Json => print_json(&tasks)?,
                OutputFormat::Text if tasks.is_empty() => println!("No tasks"),
                OutputFormat::Text => tasks.iter().for_each(print_task_line),
            }
        }
        Command::Show { id } => {
            let task = scheduler.get_task(&resolve(daemon, &id).await?).await?;
            match format {
                OutputFormat::Json => print_json(&task)?,
                OutputFormat::Text => print_task(&task),
            }
        }
        Command::Pause { id } => {
            let id = resolve(daemon, &id).await?;
            report(scheduler.pause_task(&id).await?, &id, "Paused", "only pending tasks can be paused");
        }
        Command::Resume { id } => {
            let id = resolve(daemon, &id).await?;
            report(scheduler.resume_task(&id).await?, &id, "Resumed", "task is not paused");
        }
        Command::Remove { id } => {
            let id = resolve(daemon, &id).await?;
            report(scheduler.remove_task(&id).await?, &id, "Removed", "already gone");
        }
        Command::RunNow { id } => {
            let id = resolve(daemon, &id).await?;
            report(scheduler.run_now(&id).await?, &id, "Queued", "only pending tasks can be queued");
        }
        Command::Stats => {
            let stats = scheduler.stats().await?;
            match format {
                OutputFormat::Json => print_json(&stats)?,
                OutputFormat::Text => {
                    println!("{} {}", "Tasks:".bold(), stats.total);
                    for (status, n) in &stats.by_status {
                        println!("  {:20} {}", status, n);
                    }
                    println!("{} {}", "Escalations:".bold(), stats.escalations);
                    if !stats.running.is_empty() {
                        println!("{} {}", "Busy:".bold(), stats.running.join(", "));
                    }
                }
            }
        }
        Command::Sweep => {
            let report = daemon.recovery().sweep().await?;
            match format {
                OutputFormat::Json => print_json(&report)?,
                OutputFormat::Text => println!("{} {}", "Sweep:".bold(), report),
            }
        }
        Command::Checkpoint { command } => handle_checkpoint(daemon, command, format).await?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let daemon = Daemon::open(config).context("Failed to start taskd")?;

    if matches!(cli.command, Command::Run) {
        println!("taskd running (owner {}). Press Ctrl+C to stop.", daemon.config().worker.owner_id);
        return daemon.run().await;
    }

    let result = handle(&daemon, cli.command, cli.format).await;
    daemon.close().await?;
    result
}
