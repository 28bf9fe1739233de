use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "weather-alert-bot", about = "Weather warning webhook bridge")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the service loop (default when no subcommand is given).
    Run,

    /// One-shot deletion of state rows older than the retention window.
    CleanupState {
        #[arg(long, env = "WX_CLEANUP_DAYS")]
        days: i64,
        #[arg(long, env = "WX_CLEANUP_INCLUDE_UNSENT", default_value_t = false)]
        include_unsent: bool,
        #[arg(long, env = "WX_CLEANUP_DRY_RUN", default_value_t = false)]
        dry_run: bool,
        #[arg(long, env = "WX_CLEANUP_STATE_REPOSITORY_TYPE", default_value = "file")]
        state_repository_type: String,
    },

    /// Copies every row from the JSON file backend into the SQLite backend.
    MigrateState {
        #[arg(long, env = "WX_MIGRATE_JSON_STATE_FILE")]
        json_state_file: String,
        #[arg(long, env = "WX_MIGRATE_SQLITE_STATE_FILE")]
        sqlite_state_file: String,
    },

    /// Compares the two backends and reports any divergence.
    VerifyState {
        #[arg(long, env = "WX_VERIFY_STRICT", default_value_t = false)]
        strict: bool,
    },
}
