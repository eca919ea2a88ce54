/// In-memory store for tests
///
/// Records every transaction interval and the high-water mark of concurrently open
/// transactions, so tests can assert the single-writer property directly.
use crate::db::store::{Store, StoreTransaction};
use crate::db::transaction::TransactionOptions;
use crate::error::StoreError;
use crate::models::Row;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

#[derive(Default)]
struct State {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    intervals: Mutex<Vec<(Instant, Instant)>>,
    open: AtomicUsize,
    max_open: AtomicUsize,
    begun: AtomicU64,
    committed: AtomicU64,
    rolled_back: AtomicU64,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<State>,
    delay: Duration,
    failing_tables: Arc<HashSet<String>>,
    fail_commits: bool,
    gate: Option<Arc<Semaphore>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every insert
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Reject every insert into `table`
    pub fn failing_table(mut self, table: &str) -> Self {
        let mut tables = (*self.failing_tables).clone();
        tables.insert(table.to_string());
        self.failing_tables = Arc::new(tables);
        self
    }

    pub fn failing_commits(mut self) -> Self {
        self.fail_commits = true;
        self
    }

    /// Every insert waits for (and consumes) one permit
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state.tables.lock().get(table).cloned().unwrap_or_default()
    }

    pub fn total_rows(&self) -> u64 {
        self.state.tables.lock().values().map(|rows| rows.len() as u64).sum()
    }

    pub fn begun(&self) -> u64 {
        self.state.begun.load(Ordering::SeqCst)
    }

    pub fn committed(&self) -> u64 {
        self.state.committed.load(Ordering::SeqCst)
    }

    pub fn rolled_back(&self) -> u64 {
        self.state.rolled_back.load(Ordering::SeqCst)
    }

    pub fn open_transactions(&self) -> usize {
        self.state.open.load(Ordering::SeqCst)
    }

    pub fn max_open_transactions(&self) -> usize {
        self.state.max_open.load(Ordering::SeqCst)
    }

    /// True when two recorded transaction intervals overlap
    pub fn has_overlapping_transactions(&self) -> bool {
        let mut intervals = self.state.intervals.lock().clone();
        intervals.sort_by_key(|(start, _)| *start);
        intervals.windows(2).any(|pair| pair[1].0 < pair[0].1)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self, options: TransactionOptions) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let open = self.state.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_open.fetch_max(open, Ordering::SeqCst);
        self.state.begun.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            options,
            pending: Vec::new(),
            started: Instant::now(),
            closed: false,
        }))
    }
}

struct MemoryTransaction {
    store: MemoryStore,
    options: TransactionOptions,
    pending: Vec<(String, Vec<Row>)>,
    started: Instant,
    closed: bool,
}

impl MemoryTransaction {
    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.store.state.intervals.lock().push((self.started, Instant::now()));
            self.store.state.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn insert_rows(&mut self, table: &str, rows: &[Row]) -> Result<u64, StoreError> {
        if self.options.read_only {
            return Err(StoreError::ReadOnly);
        }
        if let Some(gate) = &self.store.gate {
            let permit = gate.acquire().await.map_err(|e| StoreError::Rejected(e.to_string()))?;
            permit.forget();
        }
        if !self.store.delay.is_zero() {
            tokio::time::sleep(self.store.delay).await;
        }
        if self.store.failing_tables.contains(table) {
            return Err(StoreError::Rejected(format!("table {} is not writable", table)));
        }

        self.pending.push((table.to_string(), rows.to_vec()));
        Ok(rows.len() as u64)
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        if self.store.fail_commits {
            self.store.state.rolled_back.fetch_add(1, Ordering::SeqCst);
            self.close();
            return Err(StoreError::Rejected("commit failed".to_string()));
        }

        {
            let mut tables = self.store.state.tables.lock();
            for (table, rows) in self.pending.drain(..) {
                tables.entry(table).or_default().extend(rows);
            }
        }
        self.store.state.committed.fetch_add(1, Ordering::SeqCst);
        self.close();
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        self.pending.clear();
        self.store.state.rolled_back.fetch_add(1, Ordering::SeqCst);
        self.close();
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.closed {
            self.store.state.rolled_back.fetch_add(1, Ordering::SeqCst);
            self.close();
        }
    }
}
