/// Database Module
///
/// This module handles all PostgreSQL access for the loader:
/// - Connection pool management
/// - Optional schema migrations (run before an import, never during one)
/// - The `Store` seam the writer stage persists through, and its Postgres implementation
/// - Transaction lifecycle via `TransactionRunner`
pub mod postgres;
pub mod store;
pub mod transaction;

#[cfg(test)]
pub mod memory;

pub use postgres::PgStore;
pub use store::{Store, StoreTransaction};
pub use transaction::{IsolationLevel, TransactionOptions, TransactionRunner};

use anyhow::{Context, Result};
use sqlx::{migrate::Migrator, postgres::PgPoolOptions, PgPool};
use std::path::Path;

pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL database")?;

        Ok(Self { pool })
    }

    /// Build the store the import pipeline writes through
    pub fn store(&self) -> PgStore {
        PgStore::new(self.pool.clone())
    }

    /// Run the migrations found in `dir`
    pub async fn migrate(&self, dir: &Path) -> Result<()> {
        let migrator = Migrator::new(dir)
            .await
            .with_context(|| format!("Failed to load migrations from {}", dir.display()))?;
        migrator.run(&self.pool).await.context("Failed to run database migrations")?;

        tracing::info!("Database migrations completed successfully");
        Ok(())
    }

    /// Test the database connection
    pub async fn test_connection(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await.context("Database connection test failed")?;

        Ok(())
    }
}
