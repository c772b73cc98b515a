//! Database query functions for the `escalations` table.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{from_sqlx, StoreResult};
use crate::models::{Escalation, EscalationReason};

pub async fn insert_escalation(
    pool: &PgPool,
    task_id: Uuid,
    list_id: Uuid,
    reason_code: EscalationReason,
    context: serde_json::Value,
) -> StoreResult<Escalation> {
    sqlx::query_as::<_, Escalation>(
        "INSERT INTO escalations (task_id, list_id, reason_code, context) \
         VALUES ($1, $2, $3, $4) \
         RETURNING *",
    )
    .bind(task_id)
    .bind(list_id)
    .bind(reason_code)
    .bind(context)
    .fetch_one(pool)
    .await
    .map_err(from_sqlx)
}

/// Escalations for a list awaiting knowledge-base analysis.
pub async fn list_unanalysed(pool: &PgPool, list_id: Uuid) -> StoreResult<Vec<Escalation>> {
    sqlx::query_as::<_, Escalation>(
        "SELECT * FROM escalations WHERE list_id = $1 AND analysed_at IS NULL ORDER BY created_at ASC",
    )
    .bind(list_id)
    .fetch_all(pool)
    .await
    .map_err(from_sqlx)
}

pub async fn record_analysis(
    pool: &PgPool,
    id: Uuid,
    analysis_result: serde_json::Value,
) -> StoreResult<Escalation> {
    sqlx::query_as::<_, Escalation>(
        "UPDATE escalations SET analysed_at = now(), analysis_result = $1 WHERE id = $2 RETURNING *",
    )
    .bind(analysis_result)
    .bind(id)
    .fetch_one(pool)
    .await
    .map_err(from_sqlx)
}
