//! Main entry point for the tradelog CLI.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use shared::config::Config;
use std::path::PathBuf;

mod commands;
mod logging;

use commands::cache::{Journal, MessagesArgs, SendArgs};

/// Tradelog CLI
#[derive(Parser)]
#[command(name = "tradelog")]
#[command(about = "Inspect and maintain the tradelog local chat cache", long_about = None)]
struct Cli {
    /// Path to the configuration file (e.g., tradelog.yaml or tradelog.json)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Subcommands for the tradelog CLI
#[derive(Subcommand)]
enum Commands {
    /// List the cached messages of a session
    Messages(MessagesArgs),

    /// List cached sessions, newest first
    Sessions {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Start a new session locally
    NewSession {
        /// Title of the session
        title: String,
    },

    /// Save a message locally and queue it for delivery
    Send(SendArgs),

    /// Remove duplicate messages from a session
    Dedupe {
        /// Session to de-duplicate
        session_id: String,
    },

    /// Delete the cached messages of a session
    Clear {
        /// Session to clear
        session_id: String,
    },

    /// Drop stale local sessions and old confirmed messages
    Cleanup {
        /// Entries captured longer ago than this are removed
        #[arg(long, default_value_t = 168)]
        max_age_hours: u64,
    },

    /// Show pending and failed deliveries
    Outbox {
        /// Only show deliveries that gave up
        #[arg(long)]
        failed: bool,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Deliver every pending outbox record now
    Sync {
        /// Give failed deliveries a fresh attempt budget first
        #[arg(long)]
        retry_failed: bool,
    },

    /// Generate a configuration file
    Config {
        /// Format of the configuration file to generate (yaml or json). Defaults to yaml.
        #[arg(long, short)]
        format: Option<String>,

        /// Directory to write the file into
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// Generate shell completion scripts for the CLI
    Completion {
        /// The shell type for which to generate the completion script (e.g., bash, zsh, fish, powershell)
        #[arg(long, short)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Config { format, output_dir } => {
            let format = format.unwrap_or_else(|| "yaml".to_string());
            return commands::config::generate_config(&format, &output_dir);
        }
        Commands::Completion { shell } => {
            commands::completion::generate_completion(shell);
            return Ok(());
        }
        _ => {}
    }

    let config = Config::load_config(cli.config).context("failed to load configuration")?;
    logging::initialize_tracing(&config);
    let journal = Journal::open(&config)?;

    match cli.command {
        Commands::Messages(args) => commands::cache::list_messages(&journal, args).await?,
        Commands::Sessions { json } => commands::cache::list_sessions(&journal, json)?,
        Commands::NewSession { title } => commands::cache::new_session(&journal, title),
        Commands::Send(args) => commands::cache::send(&journal, args).await,
        Commands::Dedupe { session_id } => commands::cache::dedupe(&journal, &session_id),
        Commands::Clear { session_id } => commands::cache::clear(&journal, &session_id),
        Commands::Cleanup { max_age_hours } => {
            commands::cache::cleanup(&journal, max_age_hours);
        }
        Commands::Outbox { failed, json } => commands::cache::outbox(&journal, failed, json)?,
        Commands::Sync { retry_failed } => commands::cache::sync(&journal, retry_failed).await,
        Commands::Config { .. } | Commands::Completion { .. } => {}
    }

    Ok(())
}
