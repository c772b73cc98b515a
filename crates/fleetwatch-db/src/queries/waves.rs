//! Database query functions for the `waves` table.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{from_sqlx, StoreResult};
use crate::models::{ExecutionStatus, Wave};

pub async fn insert_wave(
    pool: &PgPool,
    execution_id: Uuid,
    wave_number: i32,
    max_parallel_agents: i32,
) -> StoreResult<Wave> {
    sqlx::query_as::<_, Wave>(
        "INSERT INTO waves (execution_id, wave_number, max_parallel_agents) \
         VALUES ($1, $2, $3) \
         RETURNING *",
    )
    .bind(execution_id)
    .bind(wave_number)
    .bind(max_parallel_agents)
    .fetch_one(pool)
    .await
    .map_err(from_sqlx)
}

pub async fn list_waves_for_execution(pool: &PgPool, execution_id: Uuid) -> StoreResult<Vec<Wave>> {
    sqlx::query_as::<_, Wave>("SELECT * FROM waves WHERE execution_id = $1 ORDER BY wave_number ASC")
        .bind(execution_id)
        .fetch_all(pool)
        .await
        .map_err(from_sqlx)
}

pub async fn transition_status(
    pool: &PgPool,
    id: Uuid,
    to: ExecutionStatus,
) -> StoreResult<Wave> {
    sqlx::query_as::<_, Wave>("UPDATE waves SET status = $1 WHERE id = $2 RETURNING *")
        .bind(to)
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(from_sqlx)
}
