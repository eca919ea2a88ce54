/// Progress Module
///
/// Per-run counters for the import pipeline plus the derived throughput and ETA figures.
///
/// Every counter lives behind a single lock so a snapshot is always a consistent copy of the
/// whole set: a reader can never observe `inserted_files` ahead of `decoded_files`.
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use std::time::{Duration, Instant};

/// Point-in-time copy of the import counters
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Progress {
    pub total_files: u64,
    pub decoded_files: u64,
    pub failed_files: u64,
    pub inserted_files: u64,
    pub decoded_rows: u64,
    pub inserted_rows: u64,
    pub total_rows: Option<u64>,
    pub rows_per_second: f64,
    #[serde(serialize_with = "serialize_opt_secs")]
    pub eta: Option<Duration>,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    pub started_at: Option<DateTime<Utc>>,
}

impl Progress {
    /// Files neither decoded nor failed yet
    pub fn pending_files(&self) -> u64 {
        self.total_files.saturating_sub(self.decoded_files + self.failed_files)
    }

    /// Every file reached a terminal state (inserted or failed)
    pub fn is_complete(&self) -> bool {
        self.total_files > 0 && self.inserted_files + self.failed_files >= self.total_files
    }

    /// Percentage of processed files that were inserted
    pub fn success_rate(&self) -> f64 {
        let processed = self.inserted_files + self.failed_files;
        if processed == 0 {
            0.0
        } else {
            (self.inserted_files as f64 / processed as f64) * 100.0
        }
    }

    pub fn files_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.inserted_files as f64 / secs
        }
    }
}

fn serialize_secs<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.as_secs_f64())
}

fn serialize_opt_secs<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(d) => serializer.serialize_some(&d.as_secs_f64()),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug, Default)]
struct Counters {
    total_files: u64,
    decoded_files: u64,
    failed_files: u64,
    inserted_files: u64,
    decoded_rows: u64,
    inserted_rows: u64,
    total_rows: Option<u64>,
    finished: Option<Duration>,
}

/// Thread-safe progress accounting for one import run
#[derive(Debug)]
pub struct ProgressTracker {
    started: Instant,
    started_at: DateTime<Utc>,
    counters: Mutex<Counters>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self { started: Instant::now(), started_at: Utc::now(), counters: Mutex::new(Counters::default()) }
    }

    pub fn set_total_files(&self, files: u64) {
        self.counters.lock().total_files = files;
    }

    /// Known row count for the whole run; switches the ETA to row velocity
    pub fn set_total_rows(&self, rows: u64) {
        self.counters.lock().total_rows = Some(rows);
    }

    /// A file decoded successfully
    pub fn record_decoded(&self, files: u64, rows: u64) {
        let mut c = self.counters.lock();
        let room = c.total_files.saturating_sub(c.decoded_files + c.failed_files);
        if files > room {
            tracing::warn!(files, room, "decoded count would exceed total files; clamping");
        }
        c.decoded_files += files.min(room);
        c.decoded_rows += rows;
    }

    /// A file failed before it was decoded
    pub fn record_failed(&self, files: u64) {
        let mut c = self.counters.lock();
        let room = c.total_files.saturating_sub(c.decoded_files + c.failed_files);
        if files > room {
            tracing::warn!(files, room, "failed count would exceed total files; clamping");
        }
        c.failed_files += files.min(room);
    }

    /// A decoded file could not be persisted: it moves from decoded to failed
    pub fn record_insert_failed(&self, files: u64, rows: u64) {
        let mut c = self.counters.lock();
        let movable = c.decoded_files.saturating_sub(c.inserted_files).min(files);
        c.decoded_files -= movable;
        c.failed_files += movable;
        c.decoded_rows = c.decoded_rows.saturating_sub(rows);
    }

    /// Rows from a committed transaction
    pub fn record_inserted(&self, files: u64, rows: u64) {
        let mut c = self.counters.lock();
        let room = c.decoded_files.saturating_sub(c.inserted_files);
        if files > room {
            tracing::warn!(files, room, "inserted count would exceed decoded files; clamping");
        }
        c.inserted_files += files.min(room);
        c.inserted_rows += rows;
    }

    /// Freeze the elapsed time; later snapshots report the run duration
    pub fn finish(&self) {
        let mut c = self.counters.lock();
        if c.finished.is_none() {
            c.finished = Some(self.started.elapsed());
        }
    }

    pub fn snapshot(&self) -> Progress {
        let c = self.counters.lock();
        let elapsed = c.finished.unwrap_or_else(|| self.started.elapsed());
        let secs = elapsed.as_secs_f64();

        // Cumulative average since start: stable, but slow to react to throughput drops.
        let rows_per_second = if secs > 0.0 { c.inserted_rows as f64 / secs } else { 0.0 };

        let eta = if c.finished.is_some() {
            Some(Duration::ZERO)
        } else {
            estimate_remaining(&c, secs, rows_per_second)
        };

        Progress {
            total_files: c.total_files,
            decoded_files: c.decoded_files,
            failed_files: c.failed_files,
            inserted_files: c.inserted_files,
            decoded_rows: c.decoded_rows,
            inserted_rows: c.inserted_rows,
            total_rows: c.total_rows,
            rows_per_second,
            eta,
            elapsed,
            started_at: Some(self.started_at),
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn estimate_remaining(c: &Counters, secs: f64, rows_per_second: f64) -> Option<Duration> {
    if let Some(total_rows) = c.total_rows {
        if rows_per_second > 0.0 {
            let remaining = total_rows.saturating_sub(c.inserted_rows) as f64;
            // Too far out to represent: report it as unknown
            return Duration::try_from_secs_f64(remaining / rows_per_second).ok();
        }
    }

    if c.decoded_files == 0 || secs <= 0.0 {
        return None;
    }
    let velocity = c.decoded_files as f64 / secs;
    let remaining = c.total_files.saturating_sub(c.decoded_files) as f64;
    Duration::try_from_secs_f64(remaining / velocity).ok()
}
