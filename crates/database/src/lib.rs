//! SQLite persistence layer for the patient-reply orchestration core.
//!
//! This crate provides async database operations for conversation context
//! snapshots, tracked records, ingestion fingerprints, the audit log and
//! dispatch failures using SQLx with SQLite. Callers own serialization: rows
//! carry JSON snapshots and timestamps as strings.
//!
//! # Example
//!
//! ```no_run
//! use database::{context, Database};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Connect and run migrations
//!     let db = Database::connect("sqlite:replies.db?mode=rwc").await?;
//!     db.migrate().await?;
//!
//!     context::upsert_context(db.pool(), "5511987654321", "{}", "2026-03-01T09:00:00Z").await?;
//!
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod context;
pub mod dispatch_failure;
pub mod error;
pub mod fingerprint;
pub mod models;
pub mod record;

pub use error::{DatabaseError, Result};
pub use models::{AuditRow, ContextSnapshot, DispatchFailure, NewAuditEntry, TrackedRecordRow};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

/// Database connection wrapper.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Default pool size for database connections.
    const DEFAULT_POOL_SIZE: u32 = 10;

    /// Connect to a SQLite database.
    ///
    /// The URL should be in the format `sqlite:path/to/db.sqlite?mode=rwc`.
    /// Use `?mode=rwc` to create the database file if it doesn't exist.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_pool_size(url, Self::DEFAULT_POOL_SIZE).await
    }

    /// Connect to a SQLite database with a custom pool size.
    ///
    /// In-memory databases are per connection, so use a pool size of 1 for them.
    pub async fn connect_with_pool_size(url: &str, pool_size: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_with(options)
            .await?;

        tracing::info!(
            "Connected to database: {} (pool size: {})",
            url,
            pool_size
        );

        Ok(Self { pool })
    }

    /// Run database migrations.
    ///
    /// This should be called once after connecting to ensure the schema is up to date.
    pub async fn migrate(&self) -> Result<()> {
        tracing::info!("Running database migrations...");

        sqlx::migrate!("./migrations").run(&self.pool).await?;

        tracing::info!("Migrations complete");
        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
