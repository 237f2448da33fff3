//! Outbound items that exhausted their attempts.

use sqlx::SqlitePool;

use crate::models::DispatchFailure;
use crate::Result;

/// Record a failed item.
pub async fn insert_failure(
    pool: &SqlitePool,
    item_id: &str,
    contact_id: &str,
    attempts: i64,
    error: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO dispatch_failures (item_id, contact_id, attempts, error)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(item_id)
    .bind(contact_id)
    .bind(attempts)
    .bind(error)
    .execute(pool)
    .await?;

    Ok(())
}

/// Most recent failures.
pub async fn list_recent(pool: &SqlitePool, limit: i64) -> Result<Vec<DispatchFailure>> {
    let rows = sqlx::query_as::<_, DispatchFailure>(
        r#"
        SELECT id, item_id, contact_id, attempts, error, created_at
        FROM dispatch_failures
        ORDER BY id DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
