/// Store Module
///
/// The persistence seam of the pipeline. The writer stage only ever sees these two traits,
/// so a Postgres pool and the in-memory test store are interchangeable.
use crate::db::transaction::TransactionOptions;
use crate::error::StoreError;
use crate::models::Row;
use async_trait::async_trait;

/// Something that can open transactions
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self, options: TransactionOptions) -> Result<Box<dyn StoreTransaction>, StoreError>;
}

/// An open transaction.
///
/// Dropping a transaction without calling `commit` must roll it back.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Insert rows into `table`, preserving their order. Returns the number of rows written.
    async fn insert_rows(&mut self, table: &str, rows: &[Row]) -> Result<u64, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// True for plain lowercase SQL identifiers: `[a-z_][a-z0-9_]*`, at most 63 bytes
pub fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
