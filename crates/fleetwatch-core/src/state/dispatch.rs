//! Convenience dispatch helpers that wrap [`super::TaskStateMachine`]
//! transitions with semantic names.

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use fleetwatch_db::models::TaskStatus;

use super::TaskStateMachine;

/// Start a task: transition `pending -> running`, after validating
/// dependencies are satisfied.
pub async fn start_task(pool: &PgPool, task_id: Uuid) -> Result<()> {
    TaskStateMachine::check_dependencies(pool, task_id).await?;
    TaskStateMachine::transition(pool, task_id, TaskStatus::Pending, TaskStatus::Running).await
}

/// Mark a task as completed: transition `running -> completed`.
pub async fn complete_task(pool: &PgPool, task_id: Uuid) -> Result<()> {
    TaskStateMachine::transition(pool, task_id, TaskStatus::Running, TaskStatus::Completed).await
}

/// Mark a task as failed: transition `running -> failed`.
pub async fn fail_task(pool: &PgPool, task_id: Uuid) -> Result<()> {
    TaskStateMachine::transition(pool, task_id, TaskStatus::Running, TaskStatus::Failed).await
}

/// Retry a failed task: transition `failed -> pending`.
pub async fn retry_task(pool: &PgPool, task_id: Uuid) -> Result<()> {
    TaskStateMachine::transition(pool, task_id, TaskStatus::Failed, TaskStatus::Pending).await
}

/// Escalate a failed task: transition `failed -> escalated`.
pub async fn escalate_task(pool: &PgPool, task_id: Uuid) -> Result<()> {
    TaskStateMachine::transition(pool, task_id, TaskStatus::Failed, TaskStatus::Escalated).await
}

/// Restore an escalated task to `pending` on operator override.
pub async fn restore_task(pool: &PgPool, task_id: Uuid) -> Result<()> {
    TaskStateMachine::transition(pool, task_id, TaskStatus::Escalated, TaskStatus::Pending).await
}

/// Skip a pending task without ever running it.
pub async fn skip_task(pool: &PgPool, task_id: Uuid) -> Result<()> {
    TaskStateMachine::transition(pool, task_id, TaskStatus::Pending, TaskStatus::Skipped).await
}
