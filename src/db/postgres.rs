/// Postgres Store
///
/// Persists decoded rows into existing tables. The schema is owned by the migration step;
/// rows are mapped onto columns by name with `jsonb_populate_recordset`, so any JSON object
/// whose keys match the table's columns can be inserted without per-table code.
use crate::db::store::{is_valid_table_name, Store, StoreTransaction};
use crate::db::transaction::TransactionOptions;
use crate::error::StoreError;
use crate::models::Row;
use async_trait::async_trait;
use sqlx::{types::Json, PgPool, Postgres, Transaction};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self, options: TransactionOptions) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Must run before any other statement in the transaction
        if let Some(statement) = options.set_transaction_sql() {
            sqlx::query(&statement).execute(&mut *tx).await?;
        }

        Ok(Box::new(PgTransaction { tx }))
    }
}

struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn insert_rows(&mut self, table: &str, rows: &[Row]) -> Result<u64, StoreError> {
        if !is_valid_table_name(table) {
            return Err(StoreError::InvalidTable(table.to_string()));
        }
        if rows.is_empty() {
            return Ok(0);
        }

        let sql = insert_sql(table);
        let result = sqlx::query(&sql).bind(Json(rows)).execute(&mut *self.tx).await?;

        tracing::debug!(table, rows = result.rows_affected(), "inserted rows");
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn insert_sql(table: &str) -> String {
    format!(r#"INSERT INTO "{table}" SELECT * FROM jsonb_populate_recordset(NULL::"{table}", $1)"#)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_sql_quotes_table() {
        assert_eq!(
            insert_sql("users"),
            r#"INSERT INTO "users" SELECT * FROM jsonb_populate_recordset(NULL::"users", $1)"#
        );
    }
}
