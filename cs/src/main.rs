use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;

use checkpointstore::cli::{Cli, Command};
use checkpointstore::config::Config;
use checkpointstore::{CheckpointDir, CheckpointKind, CheckpointManager, CheckpointRef};

fn setup_logging() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .init();
    Ok(())
}

fn kind_colored(kind: CheckpointKind) -> ColoredString {
    match kind {
        CheckpointKind::Routine => kind.as_str().green(),
        CheckpointKind::PreOperation => kind.as_str().yellow(),
        CheckpointKind::Recovery => kind.as_str().red(),
    }
}

fn print_ref(r: &CheckpointRef) {
    println!(
        "{} {:<13} {} {}",
        r.owner_id.cyan(),
        kind_colored(r.kind),
        r.created_at.format("%Y-%m-%d %H:%M:%S%.3f").to_string().dimmed(),
        r.path.display()
    );
}

/// Owners found under the primary and fallback roots
fn owners(config: &Config) -> Result<Vec<String>> {
    let mut owners = CheckpointDir::new(&config.store_path).owners()?;
    if let Some(fallback) = &config.fallback_path {
        owners.extend(CheckpointDir::new(fallback).owners()?);
    }
    owners.sort();
    owners.dedup();
    Ok(owners)
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    if let Some(store) = cli.store {
        config.store_path = store;
        config.fallback_path = None;
    }

    info!("checkpointstore: store={}", config.store_path.display());

    match cli.command {
        Command::List { owner, kind } => {
            let owners = match owner {
                Some(owner) => vec![owner],
                None => owners(&config)?,
            };
            let mut found = 0;
            for owner in owners {
                for r in CheckpointManager::new(owner, &config)?.list_checkpoints(kind)? {
                    print_ref(&r);
                    found += 1;
                }
            }
            if found == 0 {
                println!("No checkpoints found");
            }
        }
        Command::Show { path } => {
            let content =
                std::fs::read_to_string(&path).context(format!("Failed to read checkpoint {}", path.display()))?;
            let value: serde_json::Value = serde_json::from_str(&content).context("Checkpoint is not valid JSON")?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Command::Latest { owner, kind } => {
            let manager = CheckpointManager::new(&owner, &config)?;
            match manager.get_latest_checkpoint(kind)? {
                Some(r) => {
                    print_ref(&r);
                    let checkpoint = manager.load(&r)?;
                    println!("{}", serde_json::to_string_pretty(&checkpoint.state)?);
                }
                None => println!("No {} checkpoint for {}", kind, owner.cyan()),
            }
        }
        Command::Prune { owner } => {
            let owners = match owner {
                Some(owner) => vec![owner],
                None => owners(&config)?,
            };
            for owner in owners {
                let pruned = CheckpointManager::new(&owner, &config)?.prune()?;
                println!("{} Pruned {} checkpoint(s) for {}", "✓".green(), pruned, owner.cyan());
            }
        }
    }

    Ok(())
}
