//! csync CLI
//!
//! Command-line tools for inspecting and repairing a csync database.
//!
//! # Commands
//!
//! - `inspect` - Display head, node counts, leaves and unpushed nodes
//! - `log` - List changesets in insertion order
//! - `decode` - Show the row operations of a changeset
//! - `pull` - Move head forward through received changesets
//! - `merge-all` - Join every branch into a single leaf
//! - `verify` - Check commit graph integrity
//! - `reset` - Delete the changeset history

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// csync command-line database tools.
#[derive(Parser)]
#[command(name = "csync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the database file
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
    /// Display head, node counts, leaves and unpushed nodes
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List changesets in insertion order
    Log {
        /// Maximum number of changesets to list
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show the row operations of a changeset
    Decode {
        /// Changeset id
        id: String,
    },

    /// Move head forward through received changesets
    Pull,

    /// Join every branch into a single leaf
    MergeAll {
        /// Pull after merging
        #[arg(long)]
        pull: bool,
    },

    /// Check commit graph integrity
    Verify,

    /// Delete the changeset history (application tables are kept)
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Database path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Log { limit, format } => {
            let path = cli.path.ok_or("Database path required for log")?;
            commands::log::run(&path, limit, &format)?;
        }
        Commands::Decode { id } => {
            let path = cli.path.ok_or("Database path required for decode")?;
            commands::decode::run(&path, &id)?;
        }
        Commands::Pull => {
            let path = cli.path.ok_or("Database path required for pull")?;
            commands::pull::run(&path)?;
        }
        Commands::MergeAll { pull } => {
            let path = cli.path.ok_or("Database path required for merge-all")?;
            commands::pull::merge_all(&path, pull)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Database path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Reset { yes } => {
            let path = cli.path.ok_or("Database path required for reset")?;
            commands::reset::run(&path, yes)?;
        }
        Commands::Version => {
            println!("csync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
