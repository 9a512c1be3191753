use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "crew-sync")]
#[command(about = "Inspect and flush the local crew-sync mutation queues")]
pub struct Cli {
    /// Config file (defaults to $CREW_SYNC_CONFIG, then built-in defaults)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show configuration and probe the backend session
    Check,
    /// Print the detected backend schema layout
    Schema {
        #[arg(long)]
        refresh: bool,
    },
    /// Pending operation counts per entity family
    Queue,
    /// Replay every queued operation and print how many failed
    Flush,
    /// Normalize a value to an identifier
    Id {
        value: String,
        #[arg(long)]
        namespace: Option<String>,
    },
}
