//! Fingerprints of ingested scheduling events.

use sqlx::SqlitePool;

use crate::Result;

/// Remember a fingerprint. Returns `false` when it was already known.
pub async fn insert_if_new(
    pool: &SqlitePool,
    fingerprint: &str,
    record_id: &str,
    event_kind: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO appointment_fingerprints (fingerprint, record_id, event_kind)
        VALUES (?, ?, ?)
        "#,
    )
    .bind(fingerprint)
    .bind(record_id)
    .bind(event_kind)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Whether a fingerprint is known.
pub async fn exists(pool: &SqlitePool, fingerprint: &str) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        SELECT 1
        FROM appointment_fingerprints
        WHERE fingerprint = ?
        "#,
    )
    .bind(fingerprint)
    .fetch_optional(pool)
    .await?;

    Ok(row.is_some())
}
