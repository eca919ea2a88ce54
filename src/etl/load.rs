/// Load Module
///
/// The writer stage: the only task that touches the store. It drains the intake channel one
/// batch at a time and persists each batch in its own transaction, so at most one transaction
/// is ever open and a failure only ever loses a single file.
use crate::db::transaction::TransactionRunner;
use crate::error::{DecodeFailure, TxError};
use crate::models::{DecodedBatch, FailedFile, FailureStage};
use crate::progress::ProgressTracker;
use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// What to do when a file fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailurePolicy {
    /// Keep going after decode or persistence failures
    pub skip_errors: bool,
    /// Treat tables without a decoder as ordinary per-file failures instead of aborting
    pub skip_unknown: bool,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self { skip_errors: false, skip_unknown: true }
    }
}

impl FailurePolicy {
    fn aborts_on_decode(&self, failure: &DecodeFailure) -> bool {
        if failure.is_unknown_table() {
            !self.skip_unknown
        } else {
            !self.skip_errors
        }
    }
}

/// How the writer stopped
#[derive(Debug, Default)]
pub struct WriterReport {
    pub batches_committed: u64,
    pub rows_committed: u64,
    pub failures: Vec<FailedFile>,
    /// The failure that stopped the run, when the policy said to abort
    pub aborted: Option<FailedFile>,
    pub cancelled: bool,
}

pub struct WriterStage {
    runner: TransactionRunner,
    tracker: Arc<ProgressTracker>,
    cancel: CancellationToken,
    policy: FailurePolicy,
}

impl WriterStage {
    /// `cancel` is the run token: the writer watches it and cancels it itself to abort the run.
    pub fn new(
        runner: TransactionRunner,
        tracker: Arc<ProgressTracker>,
        cancel: CancellationToken,
        policy: FailurePolicy,
    ) -> Self {
        Self { runner, tracker, cancel, policy }
    }

    pub async fn run(self, mut intake: mpsc::Receiver<DecodedBatch>) -> WriterReport {
        let mut report = WriterReport::default();

        tracing::info!("Writer: started, waiting for decoded batches");

        loop {
            let batch = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                batch = intake.recv() => match batch {
                    Some(batch) => batch,
                    None => break,
                },
            };

            if let Some(failure) = self.persist(batch, &mut report).await {
                tracing::error!("Writer: aborting run: {}", failure);
                report.aborted = Some(failure);
                // Stops the decode workers as well
                self.cancel.cancel();
                break;
            }
            if report.cancelled {
                break;
            }
        }

        tracing::info!(
            "Writer: {} batches committed, {} rows, {} failed files",
            report.batches_committed,
            report.rows_committed,
            report.failures.len()
        );
        report
    }

    /// Persist one batch. Returns the failure if it must abort the run.
    async fn persist(&self, batch: DecodedBatch, report: &mut WriterReport) -> Option<FailedFile> {
        let DecodedBatch { path, table, rows, error } = batch;

        if let Some(error) = error {
            self.tracker.record_failed(1);
            let abort = self.policy.aborts_on_decode(&error);
            let failure = FailedFile { stage: FailureStage::Decode, path, table, message: error.to_string() };
            tracing::warn!("Writer: decode failure {}", failure);
            report.failures.push(failure.clone());
            return abort.then_some(failure);
        }

        let row_count = rows.len() as u64;
        let target = table.clone();
        let result = self
            .runner
            .run(&self.cancel, move |tx| async move { tx.insert_rows(&target, &rows).await }.boxed())
            .await;

        match result {
            Ok(inserted) => {
                self.tracker.record_inserted(1, inserted);
                report.batches_committed += 1;
                report.rows_committed += inserted;
                tracing::debug!(table = %table, path = %path.display(), rows = inserted, "committed batch");
                None
            }
            Err(TxError::Cancelled) => {
                // Never committed: the file stays decoded-but-not-inserted
                report.cancelled = true;
                None
            }
            Err(e) => {
                self.tracker.record_insert_failed(1, row_count);
                let failure = FailedFile { stage: FailureStage::Persist, path, table, message: e.to_string() };
                tracing::warn!("Writer: persistence failure {}", failure);
                report.failures.push(failure.clone());
                (!self.policy.skip_errors).then_some(failure)
            }
        }
    }
}
