/// Data Models Module
///
/// This module defines the core data structures that flow through the import pipeline:
/// jobs claimed by decode workers, batches handed to the writer, and the record of
/// files that failed along the way.
use crate::error::DecodeFailure;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// A single decoded record.
///
/// The pipeline treats rows as opaque payloads: decoders produce them, the store persists them.
pub type Row = serde_json::Value;

/// One discovered file waiting to be decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportJob {
    pub path: PathBuf,
    pub table: String,
}

impl ImportJob {
    pub fn new(path: impl Into<PathBuf>, table: impl Into<String>) -> Self {
        Self { path: path.into(), table: table.into() }
    }

    /// Build a job from a file path, deriving the table name from the file name.
    ///
    /// Returns `None` when the file does not follow the export naming convention.
    pub fn from_path(path: &Path) -> Option<Self> {
        crate::etl::discover::table_name_for(path).map(|table| Self::new(path, table))
    }
}

/// All rows decoded from one file, or the reason the file could not be decoded
#[derive(Debug)]
pub struct DecodedBatch {
    pub path: PathBuf,
    pub table: String,
    pub rows: Vec<Row>,
    pub error: Option<DecodeFailure>,
}

impl DecodedBatch {
    pub fn decoded(job: ImportJob, rows: Vec<Row>) -> Self {
        Self { path: job.path, table: job.table, rows, error: None }
    }

    pub fn failed(job: ImportJob, error: DecodeFailure) -> Self {
        Self { path: job.path, table: job.table, rows: Vec::new(), error: Some(error) }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// Stage of the pipeline at which a file failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureStage {
    Decode,
    Persist,
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureStage::Decode => write!(f, "Decode"),
            FailureStage::Persist => write!(f, "Persist"),
        }
    }
}

/// A file that failed, with context
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedFile {
    pub stage: FailureStage,
    pub path: PathBuf,
    pub table: String,
    pub message: String,
}

impl std::fmt::Display for FailedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {} ({}): {}", self.stage, self.path.display(), self.table, self.message)
    }
}
