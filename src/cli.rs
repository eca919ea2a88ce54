/// CLI Module
///
/// Command-line interface configuration using clap.
use crate::config::{ImportConfig, DEFAULT_QUEUE_CAPACITY};
use crate::db::transaction::{IsolationLevel, TransactionOptions};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// NDJSON Loader - parallel table import
///
/// Decode a directory of per-table JSON Lines exports and load them into PostgreSQL,
/// one transaction per file
#[derive(Parser, Debug)]
#[command(name = "ndjson-loader")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directory holding one `<table>.jsonl` export per table
    #[arg(value_name = "DIR")]
    pub root_dir: PathBuf,

    /// Database connection URL (overrides DATABASE_URL env var)
    #[arg(short = 'd', long, value_name = "URL")]
    pub database_url: Option<String>,

    /// Number of decode workers (0 = one per CPU)
    #[arg(short = 'w', long, value_name = "COUNT", default_value = "0", allow_negative_numbers = true)]
    pub workers: i64,

    /// Record failed files and keep going instead of aborting
    #[arg(long)]
    pub skip_errors: bool,

    /// Abort when a file has no decoder for its table
    #[arg(long)]
    pub no_skip_unknown: bool,

    /// Decoded files that may wait for the writer
    #[arg(long, value_name = "COUNT", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Maximum database connections
    #[arg(long, value_name = "COUNT", default_value = "5")]
    pub max_connections: u32,

    /// Expected rows across all files, for a row-based ETA
    #[arg(long, value_name = "COUNT")]
    pub total_rows: Option<u64>,

    /// Transaction isolation level for each file's transaction
    #[arg(long, value_enum, default_value_t = IsolationArg::Default)]
    pub isolation: IsolationArg,

    /// Only import these tables (repeatable); other files fail as unknown
    #[arg(long = "table", value_name = "NAME")]
    pub tables: Vec<String>,

    /// Run the migrations in this directory before importing
    #[arg(long, value_name = "DIR")]
    pub migrations: Option<PathBuf>,

    /// Seconds between progress reports
    #[arg(long, value_name = "SECONDS", default_value = "2")]
    pub progress_interval: u64,

    /// Print the final progress as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum IsolationArg {
    /// Server default
    Default,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl Cli {
    /// Validate CLI arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.queue_capacity == 0 {
            anyhow::bail!("Queue capacity must be greater than 0");
        }

        if self.max_connections == 0 {
            anyhow::bail!("Max connections must be greater than 0");
        }

        if self.progress_interval == 0 {
            anyhow::bail!("Progress interval must be greater than 0");
        }

        if let Some(bad) = self.tables.iter().find(|t| !crate::db::store::is_valid_table_name(t)) {
            anyhow::bail!("Invalid table name: {}", bad);
        }

        Ok(())
    }

    pub fn isolation(&self) -> Option<IsolationLevel> {
        match self.isolation {
            IsolationArg::Default => None,
            IsolationArg::ReadCommitted => Some(IsolationLevel::ReadCommitted),
            IsolationArg::RepeatableRead => Some(IsolationLevel::RepeatableRead),
            IsolationArg::Serializable => Some(IsolationLevel::Serializable),
        }
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval)
    }

    pub fn import_config(&self) -> ImportConfig {
        let mut tx_options = TransactionOptions::default();
        if let Some(level) = self.isolation() {
            tx_options = tx_options.with_isolation_level(level);
        }

        ImportConfig {
            worker_count: self.workers,
            skip_errors: self.skip_errors,
            skip_unknown: !self.no_skip_unknown,
            queue_capacity: self.queue_capacity,
            total_rows: self.total_rows,
            tx_options,
        }
    }
}
