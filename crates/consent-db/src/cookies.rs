//! Observed cookies, one row per cookie per crawl.

use consent_core::CookieRecord;
use sqlx::{Row, SqliteConnection, SqlitePool};

/// Insert the cookies of one crawl.
///
/// Runs on the caller's connection so it can share the crawl's transaction.
pub async fn insert_cookies(
    conn: &mut SqliteConnection,
    crawl_id: i64,
    cookies: &[CookieRecord],
) -> Result<(), sqlx::Error> {
    for cookie in cookies {
        sqlx::query(
            "INSERT INTO cookies (crawl_id, domain, cookie_domain, name, value, path, expiry,
                                  secure, http_only, same_site, source, partial)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(crawl_id)
        .bind(&cookie.domain)
        .bind(&cookie.cookie_domain)
        .bind(&cookie.name)
        .bind(&cookie.value)
        .bind(&cookie.path)
        .bind(cookie.expiry)
        .bind(cookie.secure)
        .bind(cookie.http_only)
        .bind(&cookie.same_site)
        .bind(CookieRecord::SOURCE)
        .bind(cookie.partial)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Cookies recorded for a crawl, in insertion order.
pub async fn get_by_crawl(
    pool: &SqlitePool,
    crawl_id: i64,
) -> Result<Vec<CookieRecord>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT domain, cookie_domain, name, value, path, expiry, secure, http_only,
                same_site, partial
         FROM cookies WHERE crawl_id = ? ORDER BY id",
    )
    .bind(crawl_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(CookieRecord {
                domain: row.try_get("domain")?,
                cookie_domain: row.try_get("cookie_domain")?,
                name: row.try_get("name")?,
                value: row.try_get("value")?,
                path: row.try_get("path")?,
                expiry: row.try_get("expiry")?,
                secure: row.try_get("secure")?,
                http_only: row.try_get("http_only")?,
                same_site: row.try_get("same_site")?,
                partial: row.try_get("partial")?,
            })
        })
        .collect()
}
