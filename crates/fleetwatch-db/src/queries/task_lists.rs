//! Database query functions for the `task_lists` table.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{from_sqlx, StoreResult};
use crate::models::{ListStatus, TaskList};

pub async fn insert_list(
    pool: &PgPool,
    name: &str,
    project_id: Uuid,
    agent_cap: i32,
) -> StoreResult<TaskList> {
    sqlx::query_as::<_, TaskList>(
        "INSERT INTO task_lists (name, project_id, agent_cap) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(name)
    .bind(project_id)
    .bind(agent_cap)
    .fetch_one(pool)
    .await
    .map_err(from_sqlx)
}

pub async fn get_list(pool: &PgPool, id: Uuid) -> StoreResult<TaskList> {
    sqlx::query_as::<_, TaskList>("SELECT * FROM task_lists WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(from_sqlx)
}

pub async fn list_lists_for_project(pool: &PgPool, project_id: Uuid) -> StoreResult<Vec<TaskList>> {
    sqlx::query_as::<_, TaskList>(
        "SELECT * FROM task_lists WHERE project_id = $1 ORDER BY created_at DESC",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .map_err(from_sqlx)
}

/// Every list across every project — the dashboard's `/api/lists` view.
pub async fn list_all(pool: &PgPool) -> StoreResult<Vec<TaskList>> {
    sqlx::query_as::<_, TaskList>("SELECT * FROM task_lists ORDER BY created_at DESC")
        .fetch_all(pool)
        .await
        .map_err(from_sqlx)
}

pub async fn transition_status(
    pool: &PgPool,
    id: Uuid,
    from: ListStatus,
    to: ListStatus,
) -> StoreResult<TaskList> {
    let list = sqlx::query_as::<_, TaskList>(
        "UPDATE task_lists SET status = $1 WHERE id = $2 AND status = $3 RETURNING *",
    )
    .bind(to)
    .bind(id)
    .bind(from)
    .fetch_optional(pool)
    .await
    .map_err(from_sqlx)?;

    match list {
        Some(l) => Ok(l),
        None => {
            let existing = get_list(pool, id).await?;
            Err(crate::error::StoreError::Conflict(format!(
                "list {id} expected status {from} but found {}",
                existing.status
            )))
        }
    }
}

/// Recompute and persist `wave_count`, `total_tasks`, `completed_tasks`,
/// `failed_tasks` for a list from its task rows.
pub async fn refresh_progress_counts(pool: &PgPool, id: Uuid) -> StoreResult<TaskList> {
    sqlx::query_as::<_, TaskList>(
        "UPDATE task_lists SET \
            total_tasks = (SELECT COUNT(*) FROM tasks WHERE list_id = $1), \
            completed_tasks = (SELECT COUNT(*) FROM tasks WHERE list_id = $1 AND status = 'completed'), \
            failed_tasks = (SELECT COUNT(*) FROM tasks WHERE list_id = $1 AND status IN ('failed', 'escalated')), \
            wave_count = (SELECT COALESCE(MAX(wave_position), 0) FROM tasks WHERE list_id = $1) \
         WHERE id = $1 \
         RETURNING *",
    )
    .bind(id)
    .fetch_one(pool)
    .await
    .map_err(from_sqlx)
}
