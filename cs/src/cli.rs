//! CLI argument parsing for checkpointstore

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::checkpoint::CheckpointKind;

#[derive(Parser, Debug)]
#[command(name = "cs")]
#[command(author, version, about = "Inspect and prune worker checkpoints", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Checkpoint root (overrides config)
    #[arg(short, long)]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List checkpoints, for one owner or all of them
    List {
        /// Owner (worker) id
        #[arg(short, long)]
        owner: Option<String>,

        /// Only this kind (routine, pre_operation, recovery)
        #[arg(short, long)]
        kind: Option<CheckpointKind>,
    },

    /// Print a checkpoint artifact
    Show {
        /// Path to the checkpoint file
        #[arg(required = true)]
        path: PathBuf,
    },

    /// Show the most recent checkpoint of a kind
    Latest {
        /// Owner (worker) id
        #[arg(required = true)]
        owner: String,

        /// Checkpoint kind
        #[arg(short, long, default_value = "routine")]
        kind: CheckpointKind,
    },

    /// Apply the retention policy
    Prune {
        /// Owner (worker) id; all owners when omitted
        owner: Option<String>,
    },
}
