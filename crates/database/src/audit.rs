//! Append-only audit log.

use sqlx::SqlitePool;

use crate::models::{AuditRow, NewAuditEntry};
use crate::Result;

/// Append an audit entry, returning its id.
pub async fn insert_entry(pool: &SqlitePool, entry: &NewAuditEntry) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO audit_entries (
            kind, contact_id, record_id, system_message_id, raw_text, normalized_text,
            intent, confidence, method, action, success, error, received_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&entry.kind)
    .bind(&entry.contact_id)
    .bind(&entry.record_id)
    .bind(&entry.system_message_id)
    .bind(&entry.raw_text)
    .bind(&entry.normalized_text)
    .bind(&entry.intent)
    .bind(entry.confidence)
    .bind(&entry.method)
    .bind(&entry.action)
    .bind(entry.success)
    .bind(&entry.error)
    .bind(&entry.received_at)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Most recent entries for a contact.
pub async fn list_for_contact(
    pool: &SqlitePool,
    contact_id: &str,
    limit: i64,
) -> Result<Vec<AuditRow>> {
    let rows = sqlx::query_as::<_, AuditRow>(
        r#"
        SELECT id, kind, contact_id, record_id, system_message_id, raw_text, normalized_text,
               intent, confidence, method, action, success, error, received_at, created_at
        FROM audit_entries
        WHERE contact_id = ?
        ORDER BY id DESC
        LIMIT ?
        "#,
    )
    .bind(contact_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Most recent entries overall.
pub async fn list_recent(pool: &SqlitePool, limit: i64) -> Result<Vec<AuditRow>> {
    let rows = sqlx::query_as::<_, AuditRow>(
        r#"
        SELECT id, kind, contact_id, record_id, system_message_id, raw_text, normalized_text,
               intent, confidence, method, action, success, error, received_at, created_at
        FROM audit_entries
        ORDER BY id DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Count entries per action.
pub async fn count_by_action(pool: &SqlitePool) -> Result<Vec<(String, i64)>> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        r#"
        SELECT action, COUNT(*)
        FROM audit_entries
        WHERE action IS NOT NULL
        GROUP BY action
        ORDER BY action
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
