//! Database query functions for the `agent_instances` table.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{from_sqlx, StoreResult};
use crate::models::AgentInstance;

pub async fn insert_agent(
    pool: &PgPool,
    execution_id: Uuid,
    agent_type: &str,
    current_wave: i32,
) -> StoreResult<AgentInstance> {
    sqlx::query_as::<_, AgentInstance>(
        "INSERT INTO agent_instances (execution_id, agent_type, current_wave) \
         VALUES ($1, $2, $3) \
         RETURNING *",
    )
    .bind(execution_id)
    .bind(agent_type)
    .bind(current_wave)
    .fetch_one(pool)
    .await
    .map_err(from_sqlx)
}

pub async fn list_agents_for_execution(
    pool: &PgPool,
    execution_id: Uuid,
) -> StoreResult<Vec<AgentInstance>> {
    sqlx::query_as::<_, AgentInstance>("SELECT * FROM agent_instances WHERE execution_id = $1")
        .bind(execution_id)
        .fetch_all(pool)
        .await
        .map_err(from_sqlx)
}

pub async fn assign_task(pool: &PgPool, id: Uuid, task_id: Uuid) -> StoreResult<AgentInstance> {
    sqlx::query_as::<_, AgentInstance>(
        "UPDATE agent_instances SET current_task_id = $1, status = 'busy' WHERE id = $2 RETURNING *",
    )
    .bind(task_id)
    .bind(id)
    .fetch_one(pool)
    .await
    .map_err(from_sqlx)
}

pub async fn release(pool: &PgPool, id: Uuid, succeeded: bool) -> StoreResult<AgentInstance> {
    let delta_col = if succeeded { "tasks_completed" } else { "tasks_failed" };
    let query = format!(
        "UPDATE agent_instances SET \
            current_task_id = NULL, \
            status = 'idle', \
            {delta_col} = {delta_col} + 1 \
         WHERE id = $1 \
         RETURNING *"
    );
    sqlx::query_as::<_, AgentInstance>(&query)
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(from_sqlx)
}

pub async fn heartbeat(pool: &PgPool, id: Uuid) -> StoreResult<()> {
    sqlx::query("UPDATE agent_instances SET last_heartbeat = now() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .map_err(from_sqlx)?;
    Ok(())
}

pub async fn terminate(pool: &PgPool, id: Uuid) -> StoreResult<()> {
    sqlx::query(
        "UPDATE agent_instances SET status = 'terminated', current_task_id = NULL WHERE id = $1",
    )
    .bind(id)
    .execute(pool)
    .await
    .map_err(from_sqlx)?;
    Ok(())
}

/// Every agent not yet terminated, across every execution — the dashboard's
/// `/api/agents` view.
pub async fn list_active(pool: &PgPool) -> StoreResult<Vec<AgentInstance>> {
    sqlx::query_as::<_, AgentInstance>(
        "SELECT * FROM agent_instances WHERE status != 'terminated' ORDER BY last_heartbeat DESC",
    )
    .fetch_all(pool)
    .await
    .map_err(from_sqlx)
}

/// Agents whose heartbeat is older than `stale_after_seconds`, across every
/// still-running execution — used by the orchestrator's liveness sweep.
pub async fn list_stale_agents(
    pool: &PgPool,
    stale_after_seconds: i64,
) -> StoreResult<Vec<AgentInstance>> {
    sqlx::query_as::<_, AgentInstance>(
        "SELECT * FROM agent_instances \
         WHERE status != 'terminated' \
           AND last_heartbeat < now() - make_interval(secs => $1)",
    )
    .bind(stale_after_seconds as f64)
    .fetch_all(pool)
    .await
    .map_err(from_sqlx)
}

