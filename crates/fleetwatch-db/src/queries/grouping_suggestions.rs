//! Database query functions for the `grouping_suggestions` table.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{from_sqlx, StoreResult};
use crate::models::{GroupingSuggestion, SuggestionStatus};

pub async fn insert_suggestion(
    pool: &PgPool,
    candidate_task_ids: &[Uuid],
    proposed_name: &str,
    reasoning: &str,
    similarity_score: f32,
    expires_at: chrono::DateTime<chrono::Utc>,
) -> StoreResult<GroupingSuggestion> {
    sqlx::query_as::<_, GroupingSuggestion>(
        "INSERT INTO grouping_suggestions \
            (candidate_task_ids, proposed_name, reasoning, similarity_score, expires_at) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(candidate_task_ids)
    .bind(proposed_name)
    .bind(reasoning)
    .bind(similarity_score)
    .bind(expires_at)
    .fetch_one(pool)
    .await
    .map_err(from_sqlx)
}

pub async fn list_pending(pool: &PgPool) -> StoreResult<Vec<GroupingSuggestion>> {
    sqlx::query_as::<_, GroupingSuggestion>(
        "SELECT * FROM grouping_suggestions WHERE status = 'pending' AND expires_at > now() \
         ORDER BY created_at ASC",
    )
    .fetch_all(pool)
    .await
    .map_err(from_sqlx)
}

pub async fn transition_status(
    pool: &PgPool,
    id: Uuid,
    to: SuggestionStatus,
) -> StoreResult<GroupingSuggestion> {
    sqlx::query_as::<_, GroupingSuggestion>(
        "UPDATE grouping_suggestions SET status = $1 WHERE id = $2 RETURNING *",
    )
    .bind(to)
    .bind(id)
    .fetch_one(pool)
    .await
    .map_err(from_sqlx)
}

/// Expire every suggestion whose window has lapsed without a reply,
/// returning how many rows were touched.
pub async fn expire_lapsed(pool: &PgPool) -> StoreResult<u64> {
    let result = sqlx::query(
        "UPDATE grouping_suggestions SET status = 'expired' \
         WHERE status = 'pending' AND expires_at <= now()",
    )
    .execute(pool)
    .await
    .map_err(from_sqlx)?;
    Ok(result.rows_affected())
}
