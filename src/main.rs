//! gerrit-events - stream review events from a Gerrit server
//!
//! Keeps a `gerrit stream-events` session open over SSH and prints every
//! event as one JSON line on stdout. Also runs one-off queries and reviews.

use clap::{Parser, Subcommand};
use gerrit_events_core::{error::GerritError, init_logging, QueryOptions};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "gerrit-events")]
#[command(about = "Stream Gerrit review events as JSON lines")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the server and print events until interrupted
    Stream {
        /// Configuration file (default: ~/.config/gerrit-events/config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Load and validate the configuration, then print a summary
    CheckConfig {
        /// Configuration file (default: ~/.config/gerrit-events/config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Query changes and print each one as a JSON line
    Query {
        /// Configuration file (default: ~/.config/gerrit-events/config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Include the current patch set
        #[arg(long)]
        current_patch_set: bool,
        /// Include every patch set
        #[arg(long)]
        patch_sets: bool,
        /// Gerrit query, e.g. "status:open project:tools"
        query: String,
    },
    /// Comment and vote on a patch set
    Review {
        /// Configuration file (default: ~/.config/gerrit-events/config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Review message
        #[arg(short, long)]
        message: Option<String>,
        /// Vote as Label=value, may be repeated
        #[arg(short, long = "label")]
        labels: Vec<String>,
        change: u64,
        patch_set: u64,
    },
}

fn main() {
    if let Err(e) = init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(2);
    }

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Stream { config } => cli::stream::run_stream(config.as_deref()),
        Commands::CheckConfig { config } => cli::check_config::run_check_config(config.as_deref()),
        Commands::Query {
            config,
            current_patch_set,
            patch_sets,
            query,
        } => {
            let options = QueryOptions {
                current_patch_set,
                patch_sets,
                ..QueryOptions::default()
            };
            cli::command::run_query(config.as_deref(), &query, options)
        }
        Commands::Review {
            config,
            message,
            labels,
            change,
            patch_set,
        } => cli::command::run_review(config.as_deref(), change, patch_set, message, &labels),
    };

    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            let exit_code = match e.downcast_ref::<GerritError>() {
                // Configuration errors (exit code 2)
                Some(GerritError::Config(_))
                | Some(GerritError::Toml(_))
                | Some(GerritError::TomlSerialize(_)) => 2,
                // Missing ssh client is a setup problem as well
                Some(GerritError::Transport(
                    gerrit_events_core::error::TransportError::ClientUnavailable { .. },
                )) => 2,
                _ => 1,
            };

            eprintln!("{:#}", e);
            std::process::exit(exit_code);
        }
    }
}
