//! # geoworker-db
//!
//! Job store implementations for geoworker.
//!
//! This crate provides:
//! - Connection pool management
//! - [`PgJobStore`], the PostgreSQL store over the `worker_jobs` table
//! - [`MemoryJobStore`], an in-process store with the same semantics
//! - Embedded migrations for the `worker_jobs` table
//!
//! ## Example
//!
//! ```rust,ignore
//! use geoworker_db::{Database, JobStore, NewJob};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/geoworker").await?;
//!     db.migrate().await?;
//!
//!     let job_id = db.jobs.enqueue(NewJob::new("refresh_models")).await?;
//!     println!("Queued job: {}", job_id);
//!     Ok(())
//! }
//! ```

pub mod jobs;
pub mod memory;
pub mod pool;

// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

use std::sync::Arc;

// Re-export core types
pub use geoworker_core::*;

pub use jobs::PgJobStore;
pub use memory::MemoryJobStore;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};

/// Database context: the pool plus the job store built on it.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Job store for the worker queue.
    pub jobs: PgJobStore,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            jobs: PgJobStore::new(pool.clone()),
            pool,
        }
    }

    /// Create a Database whose store reads time from `clock`.
    pub fn with_clock(pool: sqlx::Pool<sqlx::Postgres>, clock: Arc<dyn Clock>) -> Self {
        Self {
            jobs: PgJobStore::with_clock(pool.clone(), clock),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }

    /// The job store as a shareable trait object.
    pub fn job_store(&self) -> Arc<dyn JobStore> {
        Arc::new(self.jobs.clone())
    }
}
