//! opsync CLI
//!
//! Offline tools for a persisted opsync storage directory.
//!
//! # Commands
//!
//! - `inspect` - Display stored keys, model counts and queued operations
//! - `dump-queue` - Print the persisted operation queue
//! - `verify` - Check stores and queue for undecodable or stale entries

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// opsync storage tools.
#[derive(Parser)]
#[command(name = "opsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the storage directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display stored keys, model counts and queued operations
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the persisted operation queue in order
    DumpQueue {
        /// Maximum number of operations to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check stores and queue for undecodable or stale entries
    Verify,

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Storage path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::DumpQueue { limit, format } => {
            let path = cli.path.ok_or("Storage path required for dump-queue")?;
            commands::dump_queue::run(&path, limit, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Storage path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Version => {
            println!("opsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("opsync core v{}", opsync_core::VERSION);
        }
    }

    Ok(())
}
