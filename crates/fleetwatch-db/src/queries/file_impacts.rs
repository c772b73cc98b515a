//! Database query functions for the `file_impacts` table.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{from_sqlx, StoreResult};
use crate::models::{FileImpact, FileOperation, ImpactSource};

pub async fn insert_impact(
    pool: &PgPool,
    task_id: Uuid,
    path: &str,
    operation: FileOperation,
    confidence: f32,
    source: ImpactSource,
) -> StoreResult<FileImpact> {
    sqlx::query_as::<_, FileImpact>(
        "INSERT INTO file_impacts (task_id, path, operation, confidence, source) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(task_id)
    .bind(path)
    .bind(operation)
    .bind(confidence)
    .bind(source)
    .fetch_one(pool)
    .await
    .map_err(from_sqlx)
}

pub async fn list_impacts_for_task(pool: &PgPool, task_id: Uuid) -> StoreResult<Vec<FileImpact>> {
    sqlx::query_as::<_, FileImpact>("SELECT * FROM file_impacts WHERE task_id = $1")
        .bind(task_id)
        .fetch_all(pool)
        .await
        .map_err(from_sqlx)
}

/// Every impact declared by tasks in a list — the planner's raw input for
/// conflict detection, one row per (task, path, operation).
pub async fn list_impacts_for_list(pool: &PgPool, list_id: Uuid) -> StoreResult<Vec<FileImpact>> {
    sqlx::query_as::<_, FileImpact>(
        "SELECT fi.* FROM file_impacts fi \
         JOIN tasks t ON t.id = fi.task_id \
         WHERE t.list_id = $1",
    )
    .bind(list_id)
    .fetch_all(pool)
    .await
    .map_err(from_sqlx)
}

/// Record whether a predicted impact matched what the agent actually
/// touched, feeding back into [`crate::queries::file_impact_patterns`].
pub async fn mark_accuracy(pool: &PgPool, id: Uuid, accurate: bool) -> StoreResult<()> {
    sqlx::query("UPDATE file_impacts SET accurate = $1 WHERE id = $2")
        .bind(accurate)
        .bind(id)
        .execute(pool)
        .await
        .map_err(from_sqlx)?;
    Ok(())
}

/// Remove a declared or predicted impact for a task, by path and operation,
/// as `/override ... REMOVE` does. Returns whether a row was deleted.
pub async fn remove_impact(pool: &PgPool, task_id: Uuid, path: &str, operation: FileOperation) -> StoreResult<bool> {
    let result = sqlx::query("DELETE FROM file_impacts WHERE task_id = $1 AND path = $2 AND operation = $3")
        .bind(task_id)
        .bind(path)
        .bind(operation)
        .execute(pool)
        .await
        .map_err(from_sqlx)?;
    Ok(result.rows_affected() > 0)
}
