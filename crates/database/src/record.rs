//! Tracked confirmation and cancellation records.

use sqlx::SqlitePool;

use crate::models::TrackedRecordRow;
use crate::{DatabaseError, Result};

/// Create or update a record.
pub async fn upsert_record(pool: &SqlitePool, row: &TrackedRecordRow) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO tracked_records (flow, record_id, contact_id, status, badge, snapshot, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(flow, record_id) DO UPDATE SET
            contact_id = excluded.contact_id,
            status = excluded.status,
            badge = excluded.badge,
            snapshot = excluded.snapshot,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&row.flow)
    .bind(&row.record_id)
    .bind(&row.contact_id)
    .bind(&row.status)
    .bind(&row.badge)
    .bind(&row.snapshot)
    .bind(&row.updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a record by flow and id.
pub async fn get_record(pool: &SqlitePool, flow: &str, record_id: &str) -> Result<TrackedRecordRow> {
    sqlx::query_as::<_, TrackedRecordRow>(
        r#"
        SELECT flow, record_id, contact_id, status, badge, snapshot, updated_at
        FROM tracked_records
        WHERE flow = ? AND record_id = ?
        "#,
    )
    .bind(flow)
    .bind(record_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| DatabaseError::NotFound {
        entity: "tracked record",
        id: format!("{flow}/{record_id}"),
    })
}

/// List every record, most recently updated first.
pub async fn list_records(pool: &SqlitePool) -> Result<Vec<TrackedRecordRow>> {
    let rows = sqlx::query_as::<_, TrackedRecordRow>(
        r#"
        SELECT flow, record_id, contact_id, status, badge, snapshot, updated_at
        FROM tracked_records
        ORDER BY updated_at DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// List records currently carrying `badge`.
pub async fn list_by_badge(pool: &SqlitePool, badge: &str) -> Result<Vec<TrackedRecordRow>> {
    let rows = sqlx::query_as::<_, TrackedRecordRow>(
        r#"
        SELECT flow, record_id, contact_id, status, badge, snapshot, updated_at
        FROM tracked_records
        WHERE badge = ?
        ORDER BY updated_at ASC
        "#,
    )
    .bind(badge)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
