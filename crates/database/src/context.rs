//! Conversation context snapshots.

use sqlx::SqlitePool;

use crate::models::ContextSnapshot;
use crate::Result;

/// Create or replace the snapshot of one contact.
pub async fn upsert_context(
    pool: &SqlitePool,
    contact_id: &str,
    snapshot: &str,
    updated_at: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO conversation_contexts (contact_id, snapshot, updated_at)
        VALUES (?, ?, ?)
        ON CONFLICT(contact_id) DO UPDATE SET
            snapshot = excluded.snapshot,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(contact_id)
    .bind(snapshot)
    .bind(updated_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get the snapshot of one contact.
pub async fn get_context(pool: &SqlitePool, contact_id: &str) -> Result<Option<ContextSnapshot>> {
    let row = sqlx::query_as::<_, ContextSnapshot>(
        r#"
        SELECT contact_id, snapshot, updated_at
        FROM conversation_contexts
        WHERE contact_id = ?
        "#,
    )
    .bind(contact_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Load every stored snapshot.
pub async fn list_contexts(pool: &SqlitePool) -> Result<Vec<ContextSnapshot>> {
    let rows = sqlx::query_as::<_, ContextSnapshot>(
        r#"
        SELECT contact_id, snapshot, updated_at
        FROM conversation_contexts
        ORDER BY updated_at ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Delete one contact's snapshot.
pub async fn delete_context(pool: &SqlitePool, contact_id: &str) -> Result<()> {
    sqlx::query(
        r#"
        DELETE FROM conversation_contexts
        WHERE contact_id = ?
        "#,
    )
    .bind(contact_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Delete snapshots last updated before `cutoff` (RFC 3339, same format as writes).
pub async fn prune_updated_before(pool: &SqlitePool, cutoff: &str) -> Result<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM conversation_contexts
        WHERE updated_at < ?
        "#,
    )
    .bind(cutoff)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
