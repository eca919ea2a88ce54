/// Pipeline Module
///
/// Orchestrates a complete import: Discover → Decode (N workers) → Load (one writer),
/// with progress tracking, failure policy and cancellation.
use crate::config::ImportConfig;
use crate::db::store::Store;
use crate::db::transaction::TransactionRunner;
use crate::error::{ImportError, MAX_REPORTED_FAILURES};
use crate::etl::discover::discover_files;
use crate::etl::extract::DecodeWorkerPool;
use crate::etl::load::{WriterReport, WriterStage};
use crate::etl::transform::DecoderRegistry;
use crate::models::ImportJob;
use crate::progress::{Progress, ProgressTracker};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Lifecycle of an import run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Discovering,
    Running,
    Completed,
    Cancelled,
    Aborted,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Idle => write!(f, "Idle"),
            RunState::Discovering => write!(f, "Discovering"),
            RunState::Running => write!(f, "Running"),
            RunState::Completed => write!(f, "Completed"),
            RunState::Cancelled => write!(f, "Cancelled"),
            RunState::Aborted => write!(f, "Aborted"),
        }
    }
}

/// Main import pipeline
pub struct Importer {
    store: Arc<dyn Store>,
    registry: Arc<DecoderRegistry>,
    config: ImportConfig,
    state: Mutex<RunState>,
    tracker: Mutex<Option<Arc<ProgressTracker>>>,
}

impl Importer {
    pub fn new(store: Arc<dyn Store>, registry: DecoderRegistry, config: ImportConfig) -> Self {
        Self {
            store,
            registry: Arc::new(registry),
            config,
            state: Mutex::new(RunState::Idle),
            tracker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    pub fn state(&self) -> RunState {
        *self.state.lock()
    }

    /// Live progress of the current (or last) run; `None` before the first run starts
    pub fn snapshot(&self) -> Option<Progress> {
        self.tracker.lock().as_ref().map(|tracker| tracker.snapshot())
    }

    fn set_state(&self, state: RunState) {
        let previous = std::mem::replace(&mut *self.state.lock(), state);
        tracing::debug!("Import state: {} -> {}", previous, state);
    }

    /// Import every export file in `root`.
    ///
    /// Always returns the final progress. The result is `Ok` only when every file was inserted;
    /// otherwise it says whether the run was cancelled, aborted, or finished with failed files.
    pub async fn import_all(&self, cancel: &CancellationToken, root: &Path) -> (Progress, Result<(), ImportError>) {
        self.set_state(RunState::Discovering);
        // Progress of an earlier run is stale once a new one starts
        *self.tracker.lock() = None;
        tracing::info!("Discovering import files in {}", root.display());

        let jobs = match discover_files(root) {
            Ok(paths) => paths.iter().filter_map(|path| ImportJob::from_path(path)).collect::<Vec<_>>(),
            Err(e) => {
                self.set_state(RunState::Aborted);
                return (Progress::default(), Err(e.into()));
            }
        };
        if jobs.is_empty() {
            self.set_state(RunState::Aborted);
            return (Progress::default(), Err(ImportError::NoFiles { root: root.to_path_buf() }));
        }

        let tracker = Arc::new(ProgressTracker::new());
        tracker.set_total_files(jobs.len() as u64);
        if let Some(rows) = self.config.total_rows {
            tracker.set_total_rows(rows);
        }
        *self.tracker.lock() = Some(tracker.clone());

        let workers = self.config.resolved_workers();
        tracing::info!(
            "Starting import of {} files with {} decode workers (queue capacity {}, skip errors: {})",
            jobs.len(),
            workers,
            self.config.queue_capacity(),
            self.config.skip_errors
        );
        self.set_state(RunState::Running);

        // Child token: the writer cancels it to abort without touching the caller's token
        let run_token = cancel.child_token();
        let result = self.run_stages(jobs, workers, tracker.clone(), run_token).await;

        tracker.finish();
        let progress = tracker.snapshot();

        let outcome = match result {
            Err(e) => Err(e),
            Ok(_) if cancel.is_cancelled() && !progress.is_complete() => Err(ImportError::Cancelled),
            Ok(report) => match report.aborted {
                Some(failure) => Err(ImportError::Aborted { failed: progress.failed_files, failure }),
                None if progress.failed_files > 0 => {
                    let mut failures = report.failures;
                    failures.truncate(MAX_REPORTED_FAILURES);
                    Err(ImportError::Aggregate { failed: progress.failed_files, failures })
                }
                None => Ok(()),
            },
        };

        let state = match &outcome {
            Ok(()) | Err(ImportError::Aggregate { .. }) => RunState::Completed,
            Err(ImportError::Cancelled) => RunState::Cancelled,
            Err(_) => RunState::Aborted,
        };
        self.set_state(state);

        match &outcome {
            Ok(()) => tracing::info!(
                "Import complete: {} files, {} rows in {:.2}s",
                progress.inserted_files,
                progress.inserted_rows,
                progress.elapsed.as_secs_f64()
            ),
            Err(e) => tracing::warn!("Import finished as {}: {}", state, e),
        }

        (progress, outcome)
    }

    /// Feed the job queue, run the workers and the writer, and wait for all of them
    async fn run_stages(
        &self,
        jobs: Vec<ImportJob>,
        workers: usize,
        tracker: Arc<ProgressTracker>,
        run_token: CancellationToken,
    ) -> Result<WriterReport, ImportError> {
        let (job_tx, job_rx) = mpsc::channel(jobs.len());
        for job in jobs {
            // Capacity covers every job, so this never waits
            if job_tx.send(job).await.is_err() {
                break;
            }
        }
        drop(job_tx);

        let (intake_tx, intake_rx) = mpsc::channel(self.config.queue_capacity());

        let runner = TransactionRunner::new(self.store.clone()).with_options(self.config.tx_options);
        let writer = WriterStage::new(runner, tracker.clone(), run_token.clone(), self.config.failure_policy());
        let writer_handle = tokio::spawn(writer.run(intake_rx));

        let pool = DecodeWorkerPool::new(workers, self.registry.clone(), tracker, run_token.clone());
        let worker_handles = pool.spawn(job_rx, intake_tx);

        let mut task_error = None;
        for (i, handle) in worker_handles.into_iter().enumerate() {
            if let Err(e) = handle.await {
                tracing::error!("Decode worker {} failed: {}", i, e);
                run_token.cancel();
                task_error.get_or_insert_with(|| ImportError::Task(format!("decode worker {}: {}", i, e)));
            }
        }

        let report = match writer_handle.await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("Writer failed: {}", e);
                return Err(ImportError::Task(format!("writer: {}", e)));
            }
        };

        match task_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::etl::parsers::JsonLineDecoder;
    use std::fs;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;
    use tokio::sync::Semaphore;

    const ROWS_PER_FILE: usize = 5;

    fn write_files(dir: &TempDir, count: usize, bad: &[usize]) {
        for i in 0..count {
            let mut contents = String::new();
            for row in 0..ROWS_PER_FILE {
                if bad.contains(&i) && row == 2 {
                    contents.push_str("{ this is not json\n");
                } else {
                    contents.push_str(&format!("{{\"file\": {}, \"row\": {}}}\n", i, row));
                }
            }
            fs::write(dir.path().join(format!("table_{:04}.jsonl", i)), contents).unwrap();
        }
    }

    fn importer(store: &MemoryStore, config: ImportConfig) -> Importer {
        let registry = DecoderRegistry::new().with_fallback(JsonLineDecoder::new());
        Importer::new(Arc::new(store.clone()), registry, config)
    }

    fn config(workers: i64, skip_errors: bool) -> ImportConfig {
        ImportConfig { worker_count: workers, skip_errors, ..Default::default() }
    }

    fn assert_invariants(p: &Progress) {
        assert!(p.decoded_files + p.failed_files <= p.total_files, "{:?}", p);
        assert!(p.inserted_files <= p.decoded_files, "{:?}", p);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_all_files_imported() {
        let dir = TempDir::new().unwrap();
        write_files(&dir, 10, &[]);
        let store = MemoryStore::new();
        let importer = importer(&store, config(4, false));

        let (progress, result) = importer.import_all(&CancellationToken::new(), dir.path()).await;

        assert!(result.is_ok(), "{:?}", result);
        assert_eq!(progress.total_files, 10);
        assert_eq!(progress.decoded_files, 10);
        assert_eq!(progress.failed_files, 0);
        assert_eq!(progress.inserted_files, 10);
        assert_eq!(progress.inserted_rows, 50);
        assert!(progress.is_complete());
        assert_eq!(store.total_rows(), 50);
        assert_eq!(store.committed(), 10);
        assert_eq!(importer.state(), RunState::Completed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_decode_failures_skipped() {
        let dir = TempDir::new().unwrap();
        write_files(&dir, 10, &[3, 7]);
        let store = MemoryStore::new();
        let importer = importer(&store, config(4, true));

        let (progress, result) = importer.import_all(&CancellationToken::new(), dir.path()).await;

        match result {
            Err(ImportError::Aggregate { failed, failures }) => {
                assert_eq!(failed, 2);
                assert_eq!(failures.len(), 2);
            }
            other => panic!("expected aggregate failure, got {:?}", other),
        }
        assert_eq!(progress.failed_files, 2);
        assert_eq!(progress.inserted_files, 8);
        assert_eq!(store.total_rows(), 40);
        assert_eq!(importer.state(), RunState::Completed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_decode_failure_aborts_without_skip() {
        let dir = TempDir::new().unwrap();
        write_files(&dir, 10, &[3, 7]);
        let store = MemoryStore::new();
        let importer = importer(&store, config(4, false));

        let (progress, result) = importer.import_all(&CancellationToken::new(), dir.path()).await;

        match result {
            Err(ImportError::Aborted { failed, failure }) => {
                assert!(failed >= 1);
                assert!(failure.table.starts_with("table_"));
            }
            other => panic!("expected abort, got {:?}", other),
        }
        assert!(progress.inserted_files <= 8);
        assert_invariants(&progress);
        // Nothing is both failed and inserted
        assert!(progress.inserted_files + progress.failed_files <= progress.total_files);
        assert_eq!(store.committed(), progress.inserted_files);
        assert_eq!(store.total_rows(), progress.inserted_rows);
        assert_eq!(importer.state(), RunState::Aborted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancellation_returns_promptly() {
        let dir = TempDir::new().unwrap();
        write_files(&dir, 1_000, &[]);
        let store = MemoryStore::new().with_delay(Duration::from_millis(5));
        let importer = importer(&store, config(8, false));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let (progress, result) = importer.import_all(&cancel, dir.path()).await;

        assert!(matches!(result, Err(ImportError::Cancelled)), "{:?}", result);
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(progress.inserted_files < 1_000);
        assert_invariants(&progress);
        assert_eq!(store.open_transactions(), 0);
        assert_eq!(store.committed(), progress.inserted_files);
        assert_eq!(store.total_rows(), progress.inserted_rows);
        assert_eq!(importer.state(), RunState::Cancelled);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_auto_worker_count() {
        let dir = TempDir::new().unwrap();
        write_files(&dir, 3, &[]);
        let store = MemoryStore::new();
        let importer = importer(&store, config(0, false));

        assert!(importer.config().resolved_workers() >= 1);
        let (progress, result) = importer.import_all(&CancellationToken::new(), dir.path()).await;
        assert!(result.is_ok());
        assert_eq!(progress.inserted_files, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_writer() {
        let dir = TempDir::new().unwrap();
        write_files(&dir, 40, &[]);
        let store = MemoryStore::new().with_delay(Duration::from_millis(1));
        let importer = importer(&store, config(16, false));

        let (_, result) = importer.import_all(&CancellationToken::new(), dir.path()).await;

        assert!(result.is_ok());
        assert_eq!(store.committed(), 40);
        assert_eq!(store.max_open_transactions(), 1);
        assert!(!store.has_overlapping_transactions());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_backpressure_bounds_outstanding_batches() {
        let dir = TempDir::new().unwrap();
        write_files(&dir, 50, &[]);
        let gate = Arc::new(Semaphore::new(0));
        let store = MemoryStore::new().with_gate(gate.clone());
        let workers = 2;
        let capacity = 3;
        let importer = Arc::new(importer(
            &store,
            ImportConfig { worker_count: workers, queue_capacity: capacity, ..Default::default() },
        ));

        let run = {
            let importer = importer.clone();
            let root = dir.path().to_path_buf();
            tokio::spawn(async move { importer.import_all(&CancellationToken::new(), &root).await })
        };

        // Writer is stuck in its first insert; let the workers fill everything they can
        tokio::time::sleep(Duration::from_millis(300)).await;
        let stalled = importer.snapshot().unwrap();
        assert_eq!(stalled.inserted_files, 0);
        // queued batches + one held by each blocked worker + the one in the writer
        assert!(stalled.decoded_files <= (capacity + workers as usize + 1) as u64, "{:?}", stalled);

        gate.add_permits(1_000);
        let (progress, result) = run.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(progress.inserted_files, 50);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_invariants_hold_for_live_snapshots() {
        let dir = TempDir::new().unwrap();
        write_files(&dir, 60, &[5, 17, 42]);
        let store = MemoryStore::new().with_delay(Duration::from_millis(1));
        let importer = Arc::new(importer(&store, config(6, true)));

        let run = {
            let importer = importer.clone();
            let root = dir.path().to_path_buf();
            tokio::spawn(async move { importer.import_all(&CancellationToken::new(), &root).await })
        };

        while !run.is_finished() {
            if let Some(p) = importer.snapshot() {
                assert_invariants(&p);
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let (progress, _) = run.await.unwrap();
        assert_invariants(&progress);
        assert_eq!(progress.failed_files, 3);
        assert_eq!(progress.inserted_files, 57);

        // Snapshots of a finished run do not change
        assert_eq!(importer.snapshot().unwrap(), importer.snapshot().unwrap());
    }

    #[tokio::test]
    async fn test_missing_directory() {
        let dir = TempDir::new().unwrap();
        let importer = importer(&MemoryStore::new(), ImportConfig::default());

        let (progress, result) = importer.import_all(&CancellationToken::new(), &dir.path().join("nope")).await;

        assert!(matches!(result, Err(ImportError::Discovery(_))));
        assert_eq!(progress, Progress::default());
        assert_eq!(importer.state(), RunState::Aborted);
        assert!(importer.snapshot().is_none());
    }

    #[tokio::test]
    async fn test_empty_directory_fails_fast() {
        let dir = TempDir::new().unwrap();
        let importer = importer(&MemoryStore::new(), ImportConfig::default());

        let (_, result) = importer.import_all(&CancellationToken::new(), dir.path()).await;

        assert!(matches!(result, Err(ImportError::NoFiles { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_new_run_drops_previous_progress() {
        let full = TempDir::new().unwrap();
        write_files(&full, 2, &[]);
        let empty = TempDir::new().unwrap();
        let importer = importer(&MemoryStore::new(), config(2, false));

        let (_, result) = importer.import_all(&CancellationToken::new(), full.path()).await;
        assert!(result.is_ok());
        assert_eq!(importer.snapshot().map(|p| p.inserted_files), Some(2));

        let (_, result) = importer.import_all(&CancellationToken::new(), empty.path()).await;
        assert!(matches!(result, Err(ImportError::NoFiles { .. })));
        assert!(importer.snapshot().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_known_row_total_reaches_progress() {
        let dir = TempDir::new().unwrap();
        write_files(&dir, 3, &[]);
        let store = MemoryStore::new();
        let importer = importer(&store, ImportConfig { total_rows: Some(15), ..config(2, false) });

        let (progress, result) = importer.import_all(&CancellationToken::new(), dir.path()).await;

        assert!(result.is_ok());
        assert_eq!(progress.total_rows, Some(15));
        assert_eq!(progress.inserted_rows, 15);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_persistence_failure_aborts_by_default() {
        let dir = TempDir::new().unwrap();
        write_files(&dir, 4, &[]);
        fs::write(dir.path().join("locked.jsonl"), "{\"id\": 1}\n").unwrap();
        let store = MemoryStore::new().failing_table("locked");
        let importer = importer(&store, config(2, false));

        let (progress, result) = importer.import_all(&CancellationToken::new(), dir.path()).await;

        match result {
            Err(ImportError::Aborted { failure, .. }) => assert_eq!(failure.table, "locked"),
            other => panic!("expected abort, got {:?}", other),
        }
        assert!(store.rows("locked").is_empty());
        assert_invariants(&progress);
    }
}
