/// Transaction Runner
///
/// Runs a unit of work inside a begin/commit/rollback envelope:
/// - work returns `Ok` → commit (a failed commit is reported, never swallowed)
/// - work returns `Err` → rollback, original error returned
/// - work panics → rollback, then the panic resumes in the caller
/// - cancelled before begin, or by the time work returns → no commit, `TxError::Cancelled`
///
/// The runner never interrupts work that is already running; work that wants to stop early
/// checks the token itself.
use crate::db::store::{Store, StoreTransaction};
use crate::error::{StoreError, TxError};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Transaction isolation level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

/// Per-call transaction settings. The default is the store's isolation level, read-write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    pub isolation_level: Option<IsolationLevel>,
    pub read_only: bool,
}

impl TransactionOptions {
    pub fn with_isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = Some(level);
        self
    }

    pub fn with_read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// `SET TRANSACTION` statement for these options, if any differ from the defaults
    pub fn set_transaction_sql(&self) -> Option<String> {
        let mut modes = Vec::new();
        if let Some(level) = self.isolation_level {
            modes.push(format!("ISOLATION LEVEL {}", level.as_sql()));
        }
        if self.read_only {
            modes.push("READ ONLY".to_string());
        }

        if modes.is_empty() {
            None
        } else {
            Some(format!("SET TRANSACTION {}", modes.join(", ")))
        }
    }
}

/// Boxed unit of work borrowing the open transaction
pub type TxWork<'t, T> = BoxFuture<'t, Result<T, StoreError>>;

#[derive(Clone)]
pub struct TransactionRunner {
    store: Arc<dyn Store>,
    options: TransactionOptions,
}

impl TransactionRunner {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store, options: TransactionOptions::default() }
    }

    /// Default options for every `run` call
    pub fn with_options(mut self, options: TransactionOptions) -> Self {
        self.options = options;
        self
    }

    pub async fn run<T, F>(&self, cancel: &CancellationToken, work: F) -> Result<T, TxError>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut dyn StoreTransaction) -> TxWork<'t, T> + Send,
    {
        self.run_with(cancel, self.options, work).await
    }

    pub async fn run_with<T, F>(
        &self,
        cancel: &CancellationToken,
        options: TransactionOptions,
        work: F,
    ) -> Result<T, TxError>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut dyn StoreTransaction) -> TxWork<'t, T> + Send,
    {
        if cancel.is_cancelled() {
            return Err(TxError::Cancelled);
        }

        let mut tx = self.store.begin(options).await.map_err(TxError::Begin)?;

        let outcome = AssertUnwindSafe(work(&mut *tx)).catch_unwind().await;

        match outcome {
            Err(panic) => {
                rollback_quietly(tx).await;
                std::panic::resume_unwind(panic)
            }
            Ok(Err(e)) => {
                rollback_quietly(tx).await;
                Err(TxError::Work(e))
            }
            Ok(Ok(_)) if cancel.is_cancelled() => {
                tracing::debug!("cancelled before commit, rolling back");
                rollback_quietly(tx).await;
                Err(TxError::Cancelled)
            }
            Ok(Ok(value)) => {
                tx.commit().await.map_err(TxError::Commit)?;
                Ok(value)
            }
        }
    }
}

async fn rollback_quietly(tx: Box<dyn StoreTransaction>) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!("rollback failed: {}", e);
    }
}
