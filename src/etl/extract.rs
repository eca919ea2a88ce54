/// Extract Module
///
/// The decode worker pool. A fixed number of workers claim jobs from a shared queue, stream
/// each file through its table's decoder on the blocking thread pool, and hand one batch per
/// file to the writer over a bounded channel. A full channel blocks the workers, which keeps
/// decode speed tied to write speed and memory bounded by the channel capacity.
use crate::error::DecodeFailure;
use crate::etl::transform::{Decoder, DecoderRegistry};
use crate::models::{DecodedBatch, ImportJob, Row};
use crate::progress::ProgressTracker;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How often (in lines) a decoding file checks for cancellation
const CANCEL_CHECK_INTERVAL: usize = 1024;

/// Resolve a configured worker count; zero or negative means one per available processor.
pub fn resolve_worker_count(requested: i64) -> usize {
    if requested > 0 {
        requested as usize
    } else {
        num_cpus::get().max(1)
    }
}

/// Result of decoding one file
#[derive(Debug)]
pub enum FileOutcome {
    Decoded(Vec<Row>),
    Failed(DecodeFailure),
    /// Cancellation was observed mid-file; the partial rows were dropped
    Abandoned,
}

/// Decode every non-blank line of `path`. Any bad line fails the whole file.
pub fn decode_file(path: &Path, decoder: &dyn Decoder, cancel: &CancellationToken) -> FileOutcome {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => return FileOutcome::Failed(DecodeFailure::Io(e)),
    };

    let mut rows = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        if index % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
            return FileOutcome::Abandoned;
        }

        let line = match line {
            Ok(line) => line,
            Err(e) => return FileOutcome::Failed(DecodeFailure::Io(e)),
        };
        if line.trim().is_empty() {
            continue;
        }

        match decoder.decode(&line) {
            Ok(row) => rows.push(row),
            Err(source) => return FileOutcome::Failed(DecodeFailure::Line { line: index + 1, source }),
        }
    }

    FileOutcome::Decoded(rows)
}

pub struct DecodeWorkerPool {
    workers: usize,
    registry: Arc<DecoderRegistry>,
    tracker: Arc<ProgressTracker>,
    cancel: CancellationToken,
}

impl DecodeWorkerPool {
    pub fn new(
        workers: usize,
        registry: Arc<DecoderRegistry>,
        tracker: Arc<ProgressTracker>,
        cancel: CancellationToken,
    ) -> Self {
        Self { workers: workers.max(1), registry, tracker, cancel }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Start the workers. They exit once `jobs` is closed and drained, the writer hangs up,
    /// or the token is cancelled. Each handle resolves to the number of files it handed off.
    pub fn spawn(self, jobs: mpsc::Receiver<ImportJob>, intake: mpsc::Sender<DecodedBatch>) -> Vec<JoinHandle<usize>> {
        let jobs = Arc::new(Mutex::new(jobs));

        (0..self.workers)
            .map(|id| {
                let worker = Worker {
                    id,
                    jobs: jobs.clone(),
                    intake: intake.clone(),
                    registry: self.registry.clone(),
                    tracker: self.tracker.clone(),
                    cancel: self.cancel.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect()
    }
}

struct Worker {
    id: usize,
    jobs: Arc<Mutex<mpsc::Receiver<ImportJob>>>,
    intake: mpsc::Sender<DecodedBatch>,
    registry: Arc<DecoderRegistry>,
    tracker: Arc<ProgressTracker>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self) -> usize {
        let mut handed_off = 0;

        loop {
            let Some(job) = self.claim().await else {
                break;
            };

            let Some(batch) = self.decode(job).await else {
                tracing::debug!(worker = self.id, "abandoned file on cancellation");
                break;
            };

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                sent = self.intake.send(batch) => {
                    if sent.is_err() {
                        // Writer has stopped; nothing left to do
                        break;
                    }
                    handed_off += 1;
                }
            }
        }

        tracing::debug!(worker = self.id, files = handed_off, "decode worker finished");
        handed_off
    }

    /// Next job, or `None` when the queue is closed and empty or the run is cancelled
    async fn claim(&self) -> Option<ImportJob> {
        let mut jobs = self.jobs.lock().await;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            job = jobs.recv() => job,
        }
    }

    async fn decode(&self, job: ImportJob) -> Option<DecodedBatch> {
        let Some(decoder) = self.registry.resolve(&job.table) else {
            let table = job.table.clone();
            return Some(DecodedBatch::failed(job, DecodeFailure::NoDecoder { table }));
        };

        let path = job.path.clone();
        let cancel = self.cancel.clone();
        let outcome = tokio::task::spawn_blocking(move || decode_file(&path, decoder.as_ref(), &cancel)).await;

        match outcome {
            Ok(FileOutcome::Decoded(rows)) => {
                tracing::debug!(worker = self.id, table = %job.table, rows = rows.len(), "decoded file");
                // Counted before the hand-off so the writer can never report it inserted first
                self.tracker.record_decoded(1, rows.len() as u64);
                Some(DecodedBatch::decoded(job, rows))
            }
            Ok(FileOutcome::Failed(failure)) => Some(DecodedBatch::failed(job, failure)),
            Ok(FileOutcome::Abandoned) => None,
            Err(e) => Some(DecodedBatch::failed(job, DecodeFailure::Panicked(e.to_string()))),
        }
    }
}
