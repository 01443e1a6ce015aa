//! Consent Database Layer
//!
//! `SQLite` persistence for consent crawls through `SQLx`, with embedded
//! migrations. One database file per output directory holds every run, which
//! keeps crawl ids strictly increasing across runs.
//!
//! # Record sets
//!
//! - **crawl_runs**: one row per engine run
//! - **crawl_results**: one row per consent-crawled domain; the row id is the crawl id
//! - **cookies**: cookies observed during a crawl
//! - **consent_records**: consent metadata declared by the site's CMP
//!
//! Every crawl result has its cookie and consent rows written in the same
//! transaction, and a result row exists even when both counts are zero.
//!
//! # Example
//!
//! ```ignore
//! use consent_db::Database;
//!
//! let db = Database::new("consent_crawl.sqlite").await?;
//! db.run_migrations().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod connection;
/// CMP-declared consent records.
pub mod consent_records;
/// Observed cookies.
pub mod cookies;
/// Consent crawl results and per-run statistics.
#[allow(missing_docs)]
pub mod crawl_results;
/// Run bookkeeping.
pub mod crawl_runs;
pub mod error;
pub mod migrations;

// Re-export commonly used types
pub use connection::ConnectionPool;
pub use crawl_results::{CrawlRow, CrawlStatistics};
pub use crawl_runs::{CrawlRun, RunStatus};
pub use error::{DatabaseError, Result};

use consent_core::{ConsentRecord, CookieRecord, CrawlResult};
use std::path::Path;

/// High-level database interface.
#[derive(Debug, Clone)]
pub struct Database {
    pool: ConnectionPool,
}

impl Database {
    /// Open (or create) a database at `path`, or `:memory:`.
    ///
    /// # Errors
    /// Returns `DatabaseError` if the database cannot be opened.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let pool = ConnectionPool::new(path).await?;
        Ok(Self { pool })
    }

    /// Open a database and bring its schema up to date.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Self::new(path).await?;
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run all pending database migrations.
    ///
    /// # Errors
    /// Returns `DatabaseError::Migration` if any migration fails.
    pub async fn run_migrations(&self) -> Result<()> {
        migrations::run_migrations(self.pool.pool()).await
    }

    /// Get the current schema version.
    pub async fn get_schema_version(&self) -> Result<i64> {
        migrations::get_schema_version(self.pool.pool()).await
    }

    /// Get a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Sqlite> {
        self.pool.pool()
    }

    /// Start a run and return it.
    pub async fn create_run(&self, engine: &str, total_domains: u32) -> Result<CrawlRun> {
        Ok(crawl_runs::create_run(self.pool(), engine, total_domains).await?)
    }

    /// Look up a run by id.
    pub async fn get_run(&self, run_id: &str) -> Result<Option<CrawlRun>> {
        Ok(crawl_runs::get_run(self.pool(), run_id).await?)
    }

    /// Finish a run.
    pub async fn complete_run(
        &self,
        run_id: &str,
        status: RunStatus,
        total_domains: u32,
        completed_domains: u32,
        uncrawled_domains: u32,
    ) -> Result<()> {
        crawl_runs::complete_run(
            self.pool(),
            run_id,
            status,
            total_domains,
            completed_domains,
            uncrawled_domains,
        )
        .await?;
        Ok(())
    }

    /// Persist one crawl with its cookies and consent records, returning the crawl id.
    pub async fn record_crawl(
        &self,
        run_id: &str,
        result: &CrawlResult,
        cookies: &[CookieRecord],
        consent: &[ConsentRecord],
    ) -> Result<i64> {
        Ok(crawl_results::insert_crawl(self.pool(), run_id, result, cookies, consent).await?)
    }

    /// Totals per status and CMP for one run.
    pub async fn crawl_statistics(&self, run_id: &str) -> Result<CrawlStatistics> {
        Ok(crawl_results::crawl_statistics(self.pool(), run_id).await?)
    }

    /// Close the database connection gracefully.
    pub async fn close(self) {
        self.pool.close().await;
    }
}
