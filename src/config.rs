/// Configuration Module
///
/// Settings for one import run. The CLI builds this from flags and environment;
/// library callers can start from `ImportConfig::default()`.
use crate::db::transaction::TransactionOptions;
use crate::etl::extract::resolve_worker_count;
use crate::etl::load::FailurePolicy;

/// Default capacity of the decoded-batch channel between workers and writer
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Decode workers; zero or negative means one per available processor
    pub worker_count: i64,
    /// Record per-file failures and keep going instead of aborting
    pub skip_errors: bool,
    /// Tables without a decoder count as failed files instead of aborting
    pub skip_unknown: bool,
    /// Decoded batches that may wait for the writer before workers block
    pub queue_capacity: usize,
    /// Rows across all files, when known up front; switches the ETA to row velocity
    pub total_rows: Option<u64>,
    pub tx_options: TransactionOptions,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            worker_count: 0,
            skip_errors: false,
            skip_unknown: true,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            total_rows: None,
            tx_options: TransactionOptions::default(),
        }
    }
}

impl ImportConfig {
    pub fn resolved_workers(&self) -> usize {
        resolve_worker_count(self.worker_count)
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy { skip_errors: self.skip_errors, skip_unknown: self.skip_unknown }
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.max(1)
    }
}
