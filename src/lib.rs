/// NDJSON Loader
///
/// Imports a directory of per-table JSON Lines exports into PostgreSQL: files are decoded
/// by a bounded pool of workers and persisted by a single writer, one transaction per file.
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod etl;
pub mod models;
pub mod pipeline;
pub mod progress;

pub use config::ImportConfig;
pub use error::ImportError;
pub use pipeline::{Importer, RunState};
pub use progress::{Progress, ProgressTracker};
