//! Database query functions for the `execution_runs` table.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{from_sqlx, StoreResult};
use crate::models::{ExecutionRun, ExecutionStatus};

/// Start a new run for a list. `run_number` is computed as one past the
/// highest existing run for the same list, so callers don't need to track
/// it themselves.
pub async fn insert_run(pool: &PgPool, list_id: Uuid) -> StoreResult<ExecutionRun> {
    sqlx::query_as::<_, ExecutionRun>(
        "INSERT INTO execution_runs (list_id, run_number) \
         VALUES ($1, (SELECT COALESCE(MAX(run_number), 0) + 1 FROM execution_runs WHERE list_id = $1)) \
         RETURNING *",
    )
    .bind(list_id)
    .fetch_one(pool)
    .await
    .map_err(from_sqlx)
}

pub async fn get_run(pool: &PgPool, id: Uuid) -> StoreResult<ExecutionRun> {
    sqlx::query_as::<_, ExecutionRun>("SELECT * FROM execution_runs WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(from_sqlx)
}

pub async fn latest_run_for_list(pool: &PgPool, list_id: Uuid) -> StoreResult<Option<ExecutionRun>> {
    sqlx::query_as::<_, ExecutionRun>(
        "SELECT * FROM execution_runs WHERE list_id = $1 ORDER BY run_number DESC LIMIT 1",
    )
    .bind(list_id)
    .fetch_optional(pool)
    .await
    .map_err(from_sqlx)
}

pub async fn advance_wave_pointer(pool: &PgPool, id: Uuid) -> StoreResult<ExecutionRun> {
    sqlx::query_as::<_, ExecutionRun>(
        "UPDATE execution_runs SET wave_pointer = wave_pointer + 1 WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .fetch_one(pool)
    .await
    .map_err(from_sqlx)
}

pub async fn transition_status(
    pool: &PgPool,
    id: Uuid,
    to: ExecutionStatus,
) -> StoreResult<ExecutionRun> {
    let ended_clause = matches!(
        to,
        ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
    );
    if ended_clause {
        sqlx::query_as::<_, ExecutionRun>(
            "UPDATE execution_runs SET status = $1, ended_at = now() WHERE id = $2 RETURNING *",
        )
        .bind(to)
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(from_sqlx)
    } else {
        sqlx::query_as::<_, ExecutionRun>(
            "UPDATE execution_runs SET status = $1 WHERE id = $2 RETURNING *",
        )
        .bind(to)
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(from_sqlx)
    }
}

pub async fn bump_counters(
    pool: &PgPool,
    id: Uuid,
    completed_delta: i32,
    failed_delta: i32,
) -> StoreResult<ExecutionRun> {
    sqlx::query_as::<_, ExecutionRun>(
        "UPDATE execution_runs SET \
            completed_count = completed_count + $1, \
            failed_count = failed_count + $2 \
         WHERE id = $3 \
         RETURNING *",
    )
    .bind(completed_delta)
    .bind(failed_delta)
    .bind(id)
    .fetch_one(pool)
    .await
    .map_err(from_sqlx)
}
