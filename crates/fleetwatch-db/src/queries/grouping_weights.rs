//! Database query functions for the `grouping_weights` table.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{from_sqlx, StoreResult};
use crate::models::GroupingWeights;

/// Per-project grouping weights, falling back to [`GroupingWeights::default`]
/// when a project has never overridden them.
pub async fn get_for_project(pool: &PgPool, project_id: Uuid) -> StoreResult<GroupingWeights> {
    let row = sqlx::query_as::<_, GroupingWeights>(
        "SELECT * FROM grouping_weights WHERE project_id = $1",
    )
    .bind(project_id)
    .fetch_optional(pool)
    .await
    .map_err(from_sqlx)?;

    Ok(row.unwrap_or(GroupingWeights {
        project_id,
        ..GroupingWeights::default()
    }))
}

#[allow(clippy::too_many_arguments)]
pub async fn upsert(
    pool: &PgPool,
    weights: &GroupingWeights,
) -> StoreResult<GroupingWeights> {
    sqlx::query_as::<_, GroupingWeights>(
        "INSERT INTO grouping_weights \
            (project_id, file_weight, dependency_weight, semantic_weight, category_weight, \
             component_weight, similarity_threshold, max_group_size, min_group_size) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         ON CONFLICT (project_id) DO UPDATE SET \
            file_weight = EXCLUDED.file_weight, \
            dependency_weight = EXCLUDED.dependency_weight, \
            semantic_weight = EXCLUDED.semantic_weight, \
            category_weight = EXCLUDED.category_weight, \
            component_weight = EXCLUDED.component_weight, \
            similarity_threshold = EXCLUDED.similarity_threshold, \
            max_group_size = EXCLUDED.max_group_size, \
            min_group_size = EXCLUDED.min_group_size \
         RETURNING *",
    )
    .bind(weights.project_id)
    .bind(weights.file_weight)
    .bind(weights.dependency_weight)
    .bind(weights.semantic_weight)
    .bind(weights.category_weight)
    .bind(weights.component_weight)
    .bind(weights.similarity_threshold)
    .bind(weights.max_group_size)
    .bind(weights.min_group_size)
    .fetch_one(pool)
    .await
    .map_err(from_sqlx)
}
