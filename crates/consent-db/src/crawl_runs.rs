//! Run bookkeeping for presence and consent crawls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

/// One execution of an engine over a domain list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlRun {
    /// Unique identifier for the run
    pub id: String,
    /// Engine that executed the run (`presence` or `consent`)
    pub engine: String,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished (if finished)
    pub completed_at: Option<DateTime<Utc>>,
    /// Current status of the run
    pub status: RunStatus,
    /// Domains submitted to the run
    pub total_domains: u32,
    /// Domains that reached a terminal outcome
    pub completed_domains: u32,
    /// Domains never issued because the run was cancelled
    pub uncrawled_domains: u32,
}

/// Status of a crawl run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunStatus {
    /// Run is in progress
    InProgress,
    /// Every domain reached a terminal outcome
    Completed,
    /// The run was cancelled before all domains were issued
    Cancelled,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProgress => write!(f, "InProgress"),
            Self::Completed => write!(f, "Completed"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "InProgress" => Ok(Self::InProgress),
            "Completed" => Ok(Self::Completed),
            "Cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown run status '{other}'")),
        }
    }
}

/// Create a new run.
///
/// # Errors
/// Returns an error if the database operation fails.
pub async fn create_run(
    pool: &SqlitePool,
    engine: &str,
    total_domains: u32,
) -> Result<CrawlRun, sqlx::Error> {
    let id = uuid::Uuid::new_v4().to_string();
    let started_at = Utc::now();
    let status = RunStatus::InProgress;

    sqlx::query(
        "INSERT INTO crawl_runs (id, engine, started_at, status, total_domains, completed_domains)
         VALUES (?, ?, ?, ?, ?, 0)",
    )
    .bind(&id)
    .bind(engine)
    .bind(started_at.to_rfc3339())
    .bind(status.to_string())
    .bind(i64::from(total_domains))
    .execute(pool)
    .await?;

    Ok(CrawlRun {
        id,
        engine: engine.to_string(),
        started_at,
        completed_at: None,
        status,
        total_domains,
        completed_domains: 0,
        uncrawled_domains: 0,
    })
}

/// Mark a run finished, recording how many domains were submitted to it.
///
/// # Errors
/// Returns an error if the database operation fails.
pub async fn complete_run(
    pool: &SqlitePool,
    run_id: &str,
    status: RunStatus,
    total_domains: u32,
    completed_domains: u32,
    uncrawled_domains: u32,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE crawl_runs
         SET completed_at = ?, status = ?, total_domains = ?, completed_domains = ?,
             uncrawled_domains = ?
         WHERE id = ?",
    )
    .bind(Utc::now().to_rfc3339())
    .bind(status.to_string())
    .bind(i64::from(total_domains))
    .bind(i64::from(completed_domains))
    .bind(i64::from(uncrawled_domains))
    .bind(run_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Fetch a run by id.
///
/// # Errors
/// Returns an error if the query fails or a stored value cannot be decoded.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub async fn get_run(pool: &SqlitePool, run_id: &str) -> Result<Option<CrawlRun>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT id, engine, started_at, completed_at, status, total_domains,
                completed_domains, uncrawled_domains
         FROM crawl_runs WHERE id = ?",
    )
    .bind(run_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let decode = |e: String| sqlx::Error::Decode(e.into());
    let started_at: String = row.try_get("started_at")?;
    let completed_at: Option<String> = row.try_get("completed_at")?;
    let status: String = row.try_get("status")?;

    Ok(Some(CrawlRun {
        id: row.try_get("id")?,
        engine: row.try_get("engine")?,
        started_at: parse_timestamp(&started_at).map_err(decode)?,
        completed_at: completed_at
            .as_deref()
            .map(parse_timestamp)
            .transpose()
            .map_err(decode)?,
        status: status.parse().map_err(decode)?,
        total_domains: row.try_get::<i64, _>("total_domains")? as u32,
        completed_domains: row.try_get::<i64, _>("completed_domains")? as u32,
        uncrawled_domains: row.try_get::<i64, _>("uncrawled_domains")? as u32,
    }))
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp '{value}': {e}"))
}
