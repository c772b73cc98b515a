//! Database query functions for the `task_relationships` table.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{from_sqlx, StoreResult};
use crate::models::TaskRelationship;

pub async fn insert_relationship(
    pool: &PgPool,
    source_task_id: Uuid,
    target_task_id: Uuid,
    relationship_type: &str,
) -> StoreResult<TaskRelationship> {
    sqlx::query_as::<_, TaskRelationship>(
        "INSERT INTO task_relationships (source_task_id, target_task_id, relationship_type) \
         VALUES ($1, $2, $3) \
         ON CONFLICT (source_task_id, target_task_id, relationship_type) DO UPDATE \
            SET relationship_type = EXCLUDED.relationship_type \
         RETURNING *",
    )
    .bind(source_task_id)
    .bind(target_task_id)
    .bind(relationship_type)
    .fetch_one(pool)
    .await
    .map_err(from_sqlx)
}

/// Every `depends_on` edge among tasks in a list, for Kahn-layer planning.
pub async fn list_dependency_edges_for_list(
    pool: &PgPool,
    list_id: Uuid,
) -> StoreResult<Vec<TaskRelationship>> {
    sqlx::query_as::<_, TaskRelationship>(
        "SELECT tr.* FROM task_relationships tr \
         JOIN tasks s ON s.id = tr.source_task_id \
         JOIN tasks t ON t.id = tr.target_task_id \
         WHERE s.list_id = $1 AND t.list_id = $1 AND tr.relationship_type = 'depends_on'",
    )
    .bind(list_id)
    .fetch_all(pool)
    .await
    .map_err(from_sqlx)
}

pub async fn list_relationships_for_task(
    pool: &PgPool,
    task_id: Uuid,
) -> StoreResult<Vec<TaskRelationship>> {
    sqlx::query_as::<_, TaskRelationship>(
        "SELECT * FROM task_relationships WHERE source_task_id = $1 OR target_task_id = $1",
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
    .map_err(from_sqlx)
}
