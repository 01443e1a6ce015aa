//! CMP-declared consent records.

use consent_core::{CmpType, ConsentRecord, PurposeLabel};
use sqlx::{Row, SqliteConnection, SqlitePool};

/// Insert the consent records of one crawl on the caller's connection.
pub async fn insert_consent_records(
    conn: &mut SqliteConnection,
    crawl_id: i64,
    records: &[ConsentRecord],
) -> Result<(), sqlx::Error> {
    for record in records {
        sqlx::query(
            "INSERT INTO consent_records (crawl_id, domain, cmp_type, cookie_name, cookie_domain,
                                          declared_purpose_category, consent_label,
                                          purpose_description, source)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(crawl_id)
        .bind(&record.domain)
        .bind(record.cmp_type.as_str())
        .bind(&record.cookie_name)
        .bind(&record.cookie_domain)
        .bind(&record.declared_purpose_category)
        .bind(record.consent_label.code())
        .bind(&record.purpose_description)
        .bind(ConsentRecord::SOURCE)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Consent records for a crawl, in insertion order.
pub async fn get_by_crawl(
    pool: &SqlitePool,
    crawl_id: i64,
) -> Result<Vec<ConsentRecord>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT domain, cmp_type, cookie_name, cookie_domain, declared_purpose_category,
                consent_label, purpose_description
         FROM consent_records WHERE crawl_id = ? ORDER BY id",
    )
    .bind(crawl_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let cmp: String = row.try_get("cmp_type")?;
            let cmp_type = cmp
                .parse::<CmpType>()
                .map_err(|e| sqlx::Error::Decode(e.into()))?;
            Ok(ConsentRecord {
                domain: row.try_get("domain")?,
                cmp_type,
                cookie_name: row.try_get("cookie_name")?,
                cookie_domain: row.try_get("cookie_domain")?,
                declared_purpose_category: row.try_get("declared_purpose_category")?,
                consent_label: PurposeLabel::from_code(row.try_get("consent_label")?),
                purpose_description: row.try_get("purpose_description")?,
            })
        })
        .collect()
}
