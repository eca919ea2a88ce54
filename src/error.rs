/// Error types for the import pipeline
///
/// The hierarchy mirrors the pipeline stages:
/// - discovery errors are fatal and happen before any work starts
/// - decode failures and store errors are per-file and policy-gated
/// - `ImportError` is what `Importer::import_all` hands back to the caller,
///   and lets it tell "completed with failures" from "aborted" from "cancelled"
use crate::models::FailedFile;
use std::path::PathBuf;
use thiserror::Error;

/// Maximum number of failed files carried inside an aggregate error
pub const MAX_REPORTED_FAILURES: usize = 10;

/// Root directory could not be listed
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Import directory not found: '{}'", path.display())]
    NotFound { path: PathBuf },

    #[error("Import path is not a directory: '{}'", path.display())]
    NotADirectory { path: PathBuf },

    #[error("Failed to read import directory '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A single line could not be turned into a row
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a JSON object, found {0}")]
    NotAnObject(&'static str),

    #[error("missing required field '{0}'")]
    MissingField(String),
}

/// A whole file could not be decoded
#[derive(Error, Debug)]
pub enum DecodeFailure {
    #[error("no decoder registered for table '{table}'")]
    NoDecoder { table: String },

    #[error("line {line}: {source}")]
    Line {
        line: usize,
        #[source]
        source: DecodeError,
    },

    #[error("read error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decoder panicked: {0}")]
    Panicked(String),
}

impl DecodeFailure {
    pub fn is_unknown_table(&self) -> bool {
        matches!(self, DecodeFailure::NoDecoder { .. })
    }
}

/// Errors raised by a store implementation
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid table name '{0}'")]
    InvalidTable(String),

    #[error("transaction is read-only")]
    ReadOnly,

    #[error("store rejected write: {0}")]
    Rejected(String),
}

/// Outcome of a failed `TransactionRunner::run`
#[derive(Error, Debug)]
pub enum TxError {
    #[error("transaction cancelled")]
    Cancelled,

    #[error("failed to begin transaction: {0}")]
    Begin(#[source] StoreError),

    #[error("transaction rolled back: {0}")]
    Work(#[source] StoreError),

    #[error("failed to commit transaction: {0}")]
    Commit(#[source] StoreError),
}

/// Top-level error returned by an import run
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("No import files found in '{}'", root.display())]
    NoFiles { root: PathBuf },

    #[error("Import cancelled")]
    Cancelled,

    #[error("Import aborted after {failed} failed file(s); first fatal failure: {failure}")]
    Aborted { failed: u64, failure: FailedFile },

    #[error("Import completed with {failed} failed file(s)")]
    Aggregate { failed: u64, failures: Vec<FailedFile> },

    #[error("Pipeline task failed: {0}")]
    Task(String),
}

impl ImportError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ImportError::Cancelled)
    }

    /// True when the run processed every file but some of them failed
    pub fn is_partial(&self) -> bool {
        matches!(self, ImportError::Aggregate { .. })
    }

    /// Number of failed files, where the error carries one
    pub fn failed_count(&self) -> Option<u64> {
        match self {
            ImportError::Aborted { failed, .. } | ImportError::Aggregate { failed, .. } => Some(*failed),
            _ => None,
        }
    }

    /// Failed files carried by the error, in the order the writer saw them
    pub fn failures(&self) -> Option<&[FailedFile]> {
        match self {
            ImportError::Aborted { failure, .. } => Some(std::slice::from_ref(failure)),
            ImportError::Aggregate { failures, .. } => Some(failures),
            _ => None,
        }
    }

    /// Process exit code for this outcome
    pub fn exit_code(&self) -> i32 {
        match self {
            ImportError::Cancelled => 130,
            ImportError::Aggregate { .. } => 2,
            _ => 1,
        }
    }
}
