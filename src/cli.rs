//! Command-line interface.
//!
//! `serve` (the default) runs the stdio server; the other commands perform one-shot
//! maintenance against the configured database and exit.

use clap::{Parser, Subcommand};

use crate::admin::AdminService;

/// Task-switching cognitive test service.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Cli {
    /// Command to run (defaults to `serve`)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Serve JSON-RPC requests on stdin/stdout
    Serve,

    /// Abandon stale sessions and purge old abandoned ones
    Cleanup {
        /// Age in days after which unfinished sessions are abandoned
        #[arg(long)]
        stale_after_days: Option<i64>,
    },

    /// Create or upgrade the database schema and exit
    Migrate,

    /// Print platform-wide statistics
    Stats,
}

/// Result of CLI command execution.
pub struct CliResult {
    /// Exit code (0 = success)
    pub exit_code: i32,
    /// Output message
    pub message: String,
}

impl CliResult {
    /// Create a success result with the given message.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: message.into(),
        }
    }

    /// Create an error result with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }
}

/// Execute a maintenance command. `Serve` is handled by the binary.
pub async fn execute_command(command: Commands, admin: &AdminService) -> CliResult {
    match command {
        Commands::Serve => CliResult::error("serve is not a maintenance command"),
        // Opening the storage already ran the migrations.
        Commands::Migrate => CliResult::success("Database schema is up to date"),
        Commands::Cleanup { stale_after_days } => match admin.cleanup(stale_after_days).await {
            Ok(result) => CliResult::success(format!(
                "Abandoned {} stale session(s) started before {}\nDeleted {} abandoned session(s) started before {}",
                result.abandoned_sessions,
                result.cutoff_date.to_rfc3339(),
                result.deleted_sessions,
                result.purge_cutoff_date.to_rfc3339(),
            )),
            Err(e) => CliResult::error(format!("Cleanup failed: {}", e)),
        },
        Commands::Stats => match admin.overview_stats().await {
            Ok(stats) => CliResult::success(format!(
                "Users: {} ({} active)\nSessions: {} ({} completed, {:.1}% completion)",
                stats.total_users,
                stats.active_users,
                stats.total_sessions,
                stats.completed_sessions,
                stats.completion_rate * 100.0,
            )),
            Err(e) => CliResult::error(format!("Failed to load statistics: {}", e)),
        },
    }
}
