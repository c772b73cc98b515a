//! Database query functions for the `tasks` table.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{from_sqlx, StoreResult};
use crate::models::{Task, TaskStatus};

/// Insert a new task row. Returns the inserted task with server-generated
/// defaults (id, status, timestamps).
#[allow(clippy::too_many_arguments)]
pub async fn insert_task(
    pool: &PgPool,
    human_id: &str,
    project_id: Uuid,
    title: &str,
    description: &str,
    category: crate::models::TaskCategory,
    effort: crate::models::TaskEffort,
    priority: i32,
) -> StoreResult<Task> {
    sqlx::query_as::<_, Task>(
        "INSERT INTO tasks (human_id, project_id, title, description, category, effort, priority) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING *",
    )
    .bind(human_id)
    .bind(project_id)
    .bind(title)
    .bind(description)
    .bind(category)
    .bind(effort)
    .bind(priority)
    .fetch_one(pool)
    .await
    .map_err(from_sqlx)
}

pub async fn get_task(pool: &PgPool, id: Uuid) -> StoreResult<Task> {
    sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(from_sqlx)
}

/// List every task currently assigned to a list, ordered for display (not
/// for scheduling — the planner computes its own wave order).
pub async fn list_tasks_for_list(pool: &PgPool, list_id: Uuid) -> StoreResult<Vec<Task>> {
    sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE list_id = $1 ORDER BY priority DESC, created_at ASC",
    )
    .bind(list_id)
    .fetch_all(pool)
    .await
    .map_err(from_sqlx)
}

/// Tasks not yet assigned to any list, for a project.
pub async fn list_unassigned_tasks(pool: &PgPool, project_id: Uuid) -> StoreResult<Vec<Task>> {
    sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE project_id = $1 AND list_id IS NULL ORDER BY created_at ASC",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
    .map_err(from_sqlx)
}

pub async fn assign_to_list(
    pool: &PgPool,
    task_id: Uuid,
    list_id: Uuid,
    wave_position: i32,
) -> StoreResult<()> {
    let result = sqlx::query(
        "UPDATE tasks SET list_id = $1, wave_position = $2, updated_at = now() WHERE id = $3",
    )
    .bind(list_id)
    .bind(wave_position)
    .bind(task_id)
    .execute(pool)
    .await
    .map_err(from_sqlx)?;

    if result.rows_affected() == 0 {
        return Err(crate::error::StoreError::NotFound(format!(
            "task {task_id} not found"
        )));
    }
    Ok(())
}

/// Optimistically transition a task's status, checking the expected current
/// status in the `WHERE` clause so two writers racing on the same task never
/// both believe they won.
pub async fn transition_status(
    pool: &PgPool,
    task_id: Uuid,
    from: TaskStatus,
    to: TaskStatus,
) -> StoreResult<Task> {
    let task = sqlx::query_as::<_, Task>(
        "UPDATE tasks SET status = $1, updated_at = now() \
         WHERE id = $2 AND status = $3 \
         RETURNING *",
    )
    .bind(to)
    .bind(task_id)
    .bind(from)
    .fetch_optional(pool)
    .await
    .map_err(from_sqlx)?;

    match task {
        Some(t) => Ok(t),
        None => {
            let existing = get_task(pool, task_id).await?;
            Err(crate::error::StoreError::Conflict(format!(
                "task {task_id} expected status {from} but found {}",
                existing.status
            )))
        }
    }
}

/// Record a failed attempt: bump `retry_count`/`consecutive_failures` and
/// stash the classified error, all in one statement so the counters never
/// drift from the status transition that accompanies them.
pub async fn record_failure(
    pool: &PgPool,
    task_id: Uuid,
    error_class: crate::models::ErrorClass,
    error_message: &str,
) -> StoreResult<Task> {
    sqlx::query_as::<_, Task>(
        "UPDATE tasks SET \
            retry_count = retry_count + 1, \
            consecutive_failures = consecutive_failures + 1, \
            last_error_class = $1, \
            last_error_message = $2, \
            status = 'failed', \
            updated_at = now() \
         WHERE id = $3 \
         RETURNING *",
    )
    .bind(error_class)
    .bind(error_message)
    .bind(task_id)
    .fetch_one(pool)
    .await
    .map_err(from_sqlx)
}

/// Reset the consecutive-failure streak after a task completes successfully.
pub async fn clear_failure_streak(pool: &PgPool, task_id: Uuid) -> StoreResult<()> {
    sqlx::query("UPDATE tasks SET consecutive_failures = 0 WHERE id = $1")
        .bind(task_id)
        .execute(pool)
        .await
        .map_err(from_sqlx)?;
    Ok(())
}

pub async fn mark_escalated(pool: &PgPool, task_id: Uuid) -> StoreResult<Task> {
    sqlx::query_as::<_, Task>(
        "UPDATE tasks SET status = 'escalated', escalated_to_sia = true, escalated_at = now(), updated_at = now() \
         WHERE id = $1 \
         RETURNING *",
    )
    .bind(task_id)
    .fetch_one(pool)
    .await
    .map_err(from_sqlx)
}

/// Tasks belonging to a list whose status is still `pending`, in wave
/// order — the planner's starting point before it re-derives waves from
/// dependency and file-impact data.
pub async fn list_pending_in_wave_order(pool: &PgPool, list_id: Uuid) -> StoreResult<Vec<Task>> {
    sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks \
         WHERE list_id = $1 AND status = 'pending' \
         ORDER BY wave_position ASC NULLS LAST, priority DESC, created_at ASC",
    )
    .bind(list_id)
    .fetch_all(pool)
    .await
    .map_err(from_sqlx)
}

/// Revert any task left `running` by a crashed agent back to `pending`, for
/// restart recovery.
pub async fn reset_orphaned_tasks(pool: &PgPool, list_id: Uuid) -> StoreResult<u64> {
    let result = sqlx::query(
        "UPDATE tasks SET status = 'pending', updated_at = now() \
         WHERE list_id = $1 AND status = 'running'",
    )
    .bind(list_id)
    .execute(pool)
    .await
    .map_err(from_sqlx)?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    // Exercised against a real database in `fleetwatch-db/tests`; this
    // module intentionally carries no unit tests of its own since every
    // function here is a thin, untestable-without-a-connection SQL wrapper.
}
