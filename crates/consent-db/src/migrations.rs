//! Database migration management.
//!
//! SQL migrations are embedded at compile time and tracked by `SQLx` in the
//! `_sqlx_migrations` table.

use crate::error::{DatabaseError, Result};
use sqlx::{Pool, Sqlite};

/// Run all pending database migrations.
///
/// # Errors
/// Returns `DatabaseError::Migration` if any migration fails to execute.
pub async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
    tracing::debug!("Running database migrations");

    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| DatabaseError::Migration(format!("migration execution failed: {e}")))?;

    Ok(())
}

/// Get the current schema version, 0 when nothing was applied yet.
pub async fn get_schema_version(pool: &Pool<Sqlite>) -> Result<i64> {
    let table_exists = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'",
    )
    .fetch_one(pool)
    .await?
        > 0;

    if !table_exists {
        return Ok(0);
    }

    let version =
        sqlx::query_scalar::<_, i64>("SELECT COALESCE(MAX(version), 0) FROM _sqlx_migrations")
            .fetch_optional(pool)
            .await?
            .unwrap_or(0);

    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionPool;

    #[tokio::test]
    async fn test_run_migrations() {
        let pool = ConnectionPool::new(":memory:").await.expect("create pool");
        assert_eq!(get_schema_version(pool.pool()).await.unwrap(), 0);

        run_migrations(pool.pool()).await.expect("run migrations");

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name != '_sqlx_migrations' ORDER BY name"
        )
        .fetch_all(pool.pool())
        .await
        .expect("query tables");

        assert_eq!(
            tables,
            vec!["consent_records", "cookies", "crawl_results", "crawl_runs"]
        );
        assert_eq!(get_schema_version(pool.pool()).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = ConnectionPool::new(":memory:").await.expect("create pool");
        run_migrations(pool.pool()).await.expect("first run");
        run_migrations(pool.pool()).await.expect("second run");
        assert_eq!(get_schema_version(pool.pool()).await.unwrap(), 4);
    }
}
