//! Database query functions for the `failure_records` table.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{from_sqlx, StoreResult};
use crate::models::{ErrorCategory, ErrorClass, FailureRecord};

#[allow(clippy::too_many_arguments)]
pub async fn insert_record(
    pool: &PgPool,
    task_id: Uuid,
    agent_id: Option<Uuid>,
    attempt: i32,
    error_class: ErrorClass,
    error_category: ErrorCategory,
    message: &str,
    stdout_tail: Option<&str>,
    stderr_tail: Option<&str>,
    current_step: Option<&str>,
    file_path: Option<&str>,
    stack: Option<&str>,
) -> StoreResult<FailureRecord> {
    sqlx::query_as::<_, FailureRecord>(
        "INSERT INTO failure_records \
            (task_id, agent_id, attempt, error_class, error_category, message, \
             stdout_tail, stderr_tail, current_step, file_path, stack) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
         RETURNING *",
    )
    .bind(task_id)
    .bind(agent_id)
    .bind(attempt)
    .bind(error_class)
    .bind(error_category)
    .bind(message)
    .bind(stdout_tail)
    .bind(stderr_tail)
    .bind(current_step)
    .bind(file_path)
    .bind(stack)
    .fetch_one(pool)
    .await
    .map_err(from_sqlx)
}

/// Most recent `n` failure records for a task, newest first — the failure
/// controller's window for "no progress" detection.
pub async fn recent_for_task(
    pool: &PgPool,
    task_id: Uuid,
    n: i64,
) -> StoreResult<Vec<FailureRecord>> {
    sqlx::query_as::<_, FailureRecord>(
        "SELECT * FROM failure_records WHERE task_id = $1 ORDER BY recorded_at DESC LIMIT $2",
    )
    .bind(task_id)
    .bind(n)
    .fetch_all(pool)
    .await
    .map_err(from_sqlx)
}
