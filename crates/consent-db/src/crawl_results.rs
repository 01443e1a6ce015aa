//! Consent crawl results.
//!
//! The row id of `crawl_results` is the crawl id. It comes from an
//! `AUTOINCREMENT` column, so ids strictly increase across runs sharing a
//! database file and are never reused.

use crate::{consent_records, cookies};
use chrono::Utc;
use consent_core::{ConsentRecord, CookieRecord, CrawlResult};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;

/// A stored crawl result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlRow {
    pub id: i64,
    pub run_id: String,
    pub domain: String,
    pub url: String,
    pub status: String,
    pub cmp_type: Option<String>,
    pub cookies_collected: i64,
    pub consent_status: String,
    pub duration_ms: i64,
    pub error_message: Option<String>,
    pub crawled_at: String,
}

/// Per-run totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlStatistics {
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
    /// Keyed by CMP name, `none` when no CMP was detected
    pub by_cmp: BTreeMap<String, i64>,
    pub cookies: i64,
    pub consent_records: i64,
}

/// Persist a crawl result with its cookies and consent records.
///
/// All rows are written in one transaction, so readers never observe a result
/// without its cookies. Returns the new crawl id.
///
/// # Errors
/// Returns an error if any insert fails; nothing is written in that case.
pub async fn insert_crawl(
    pool: &SqlitePool,
    run_id: &str,
    result: &CrawlResult,
    cookie_records: &[CookieRecord],
    consent: &[ConsentRecord],
) -> Result<i64, sqlx::Error> {
    let mut tx = pool.begin().await?;

    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    let crawl_id = sqlx::query(
        "INSERT INTO crawl_results (run_id, domain, url, status, cmp_type, cookies_collected,
                                    consent_status, duration_ms, error_message, crawled_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(run_id)
    .bind(&result.domain)
    .bind(&result.url)
    .bind(result.status.as_str())
    .bind(result.cmp_type.map(|c| c.as_str()))
    .bind(result.cookies_collected_count as i64)
    .bind(result.consent_status.as_str())
    .bind(result.duration.as_millis() as i64)
    .bind(&result.error_message)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    cookies::insert_cookies(&mut tx, crawl_id, cookie_records).await?;
    consent_records::insert_consent_records(&mut tx, crawl_id, consent).await?;

    tx.commit().await?;
    Ok(crawl_id)
}

/// Results of a run, in crawl id order.
pub async fn get_by_run(pool: &SqlitePool, run_id: &str) -> Result<Vec<CrawlRow>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT id, run_id, domain, url, status, cmp_type, cookies_collected, consent_status,
                duration_ms, error_message, crawled_at
         FROM crawl_results WHERE run_id = ? ORDER BY id",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(CrawlRow {
                id: row.try_get("id")?,
                run_id: row.try_get("run_id")?,
                domain: row.try_get("domain")?,
                url: row.try_get("url")?,
                status: row.try_get("status")?,
                cmp_type: row.try_get("cmp_type")?,
                cookies_collected: row.try_get("cookies_collected")?,
                consent_status: row.try_get("consent_status")?,
                duration_ms: row.try_get("duration_ms")?,
                error_message: row.try_get("error_message")?,
                crawled_at: row.try_get("crawled_at")?,
            })
        })
        .collect()
}

/// Totals per status and CMP for one run.
pub async fn crawl_statistics(
    pool: &SqlitePool,
    run_id: &str,
) -> Result<CrawlStatistics, sqlx::Error> {
    let mut stats = CrawlStatistics::default();

    let by_status = sqlx::query_as::<_, (String, i64)>(
        "SELECT status, COUNT(*) FROM crawl_results WHERE run_id = ? GROUP BY status",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;
    for (status, count) in by_status {
        stats.total += count;
        stats.by_status.insert(status, count);
    }

    let by_cmp = sqlx::query_as::<_, (String, i64)>(
        "SELECT COALESCE(cmp_type, 'none'), COUNT(*) FROM crawl_results
         WHERE run_id = ? GROUP BY COALESCE(cmp_type, 'none')",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;
    stats.by_cmp.extend(by_cmp);

    stats.cookies = sqlx::query_scalar(
        "SELECT COUNT(*) FROM cookies c JOIN crawl_results r ON c.crawl_id = r.id
         WHERE r.run_id = ?",
    )
    .bind(run_id)
    .fetch_one(pool)
    .await?;

    stats.consent_records = sqlx::query_scalar(
        "SELECT COUNT(*) FROM consent_records c JOIN crawl_results r ON c.crawl_id = r.id
         WHERE r.run_id = ?",
    )
    .bind(run_id)
    .fetch_one(pool)
    .await?;

    Ok(stats)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::crawl_runs::create_run;
    use crate::Database;
    use consent_core::{CmpType, ConsentStatus, CrawlStatus};
    use std::time::Duration;

    async fn setup_test_db() -> Database {
        let db = Database::new(":memory:").await.expect("create test database");
        db.run_migrations().await.expect("run migrations");
        db
    }

    fn result(domain: &str, status: CrawlStatus, cmp: Option<CmpType>, cookies: usize) -> CrawlResult {
        CrawlResult {
            domain: domain.to_string(),
            url: format!("https://{domain}/"),
            status,
            cmp_type: cmp,
            cookies_collected_count: cookies,
            consent_status: ConsentStatus::NotApplicable,
            duration: Duration::from_millis(1500),
            error_message: None,
        }
    }

    fn cookie(domain: &str, name: &str) -> CookieRecord {
        CookieRecord {
            domain: domain.to_string(),
            cookie_domain: format!(".{domain}"),
            name: name.to_string(),
            value: "1".to_string(),
            path: "/".to_string(),
            expiry: Some(1_900_000_000.0),
            secure: true,
            http_only: false,
            same_site: Some("Lax".to_string()),
            partial: false,
        }
    }

    #[tokio::test]
    async fn test_insert_crawl_with_children() {
        let db = setup_test_db().await;
        let run = create_run(db.pool(), "consent", 1).await.unwrap();

        let consent = vec![ConsentRecord::declared(
            "shop.test",
            CmpType::Cookiebot,
            Some("_ga".to_string()),
            Some("shop.test".to_string()),
            "Statistics",
            Some("Registers a unique ID".to_string()),
        )];
        let observed = vec![cookie("shop.test", "_ga"), cookie("shop.test", "CookieConsent")];

        let crawl_id = insert_crawl(
            db.pool(),
            &run.id,
            &result("shop.test", CrawlStatus::Success, Some(CmpType::Cookiebot), 2),
            &observed,
            &consent,
        )
        .await
        .expect("insert crawl");

        let stored_cookies = cookies::get_by_crawl(db.pool(), crawl_id).await.unwrap();
        assert_eq!(stored_cookies, observed);

        let stored_consent = consent_records::get_by_crawl(db.pool(), crawl_id).await.unwrap();
        assert_eq!(stored_consent, consent);

        let rows = get_by_run(db.pool(), &run.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, crawl_id);
        assert_eq!(rows[0].status, "success");
        assert_eq!(rows[0].cookies_collected, 2);
        assert_eq!(rows[0].duration_ms, 1500);
    }

    #[tokio::test]
    async fn test_zero_count_crawl_is_stored() {
        let db = setup_test_db().await;
        let run = create_run(db.pool(), "consent", 1).await.unwrap();

        let crawl_id = insert_crawl(
            db.pool(),
            &run.id,
            &result("down.test", CrawlStatus::BrowserCrash, None, 0),
            &[],
            &[],
        )
        .await
        .unwrap();

        assert!(cookies::get_by_crawl(db.pool(), crawl_id).await.unwrap().is_empty());
        assert!(consent_records::get_by_crawl(db.pool(), crawl_id)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(get_by_run(db.pool(), &run.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_crawl_ids_increase() {
        let db = setup_test_db().await;
        let run = create_run(db.pool(), "consent", 3).await.unwrap();

        let mut last = 0;
        for domain in ["a.test", "b.test", "c.test"] {
            let id = insert_crawl(
                db.pool(),
                &run.id,
                &result(domain, CrawlStatus::Success, None, 0),
                &[],
                &[],
            )
            .await
            .unwrap();
            assert!(id > last);
            last = id;
        }
    }

    #[tokio::test]
    async fn test_crawl_statistics() {
        let db = setup_test_db().await;
        let run = create_run(db.pool(), "consent", 3).await.unwrap();

        insert_crawl(
            db.pool(),
            &run.id,
            &result("a.test", CrawlStatus::Success, Some(CmpType::OneTrust), 1),
            &[cookie("a.test", "OptanonConsent")],
            &[],
        )
        .await
        .unwrap();
        insert_crawl(
            db.pool(),
            &run.id,
            &result("b.test", CrawlStatus::Timeout, None, 0),
            &[],
            &[],
        )
        .await
        .unwrap();
        insert_crawl(
            db.pool(),
            &run.id,
            &result("c.test", CrawlStatus::Success, None, 0),
            &[],
            &[],
        )
        .await
        .unwrap();

        let stats = crawl_statistics(db.pool(), &run.id).await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_status.get("success"), Some(&2));
        assert_eq!(stats.by_status.get("timeout"), Some(&1));
        assert_eq!(stats.by_cmp.get("none"), Some(&2));
        assert_eq!(stats.by_cmp.get(CmpType::OneTrust.as_str()), Some(&1));
        assert_eq!(stats.cookies, 1);
        assert_eq!(stats.consent_records, 0);
    }
}
