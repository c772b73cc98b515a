//! Database query functions for the `file_impact_patterns` table.
//!
//! Feeds the file-impact analyser's historical-pattern source: learned
//! (category, path glob, operation) accuracy, updated as predictions are
//! confirmed or refuted by what agents actually touch.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{from_sqlx, StoreResult};
use crate::models::{FileImpactPattern, FileOperation, TaskCategory};

pub async fn list_for_category(
    pool: &PgPool,
    category: TaskCategory,
) -> StoreResult<Vec<FileImpactPattern>> {
    sqlx::query_as::<_, FileImpactPattern>(
        "SELECT * FROM file_impact_patterns WHERE category = $1 ORDER BY accuracy DESC",
    )
    .bind(category)
    .fetch_all(pool)
    .await
    .map_err(from_sqlx)
}

/// Upsert a pattern observation, folding the new sample into a running
/// average: `accuracy' = (accuracy * n + observed) / (n + 1)`.
pub async fn record_observation(
    pool: &PgPool,
    category: TaskCategory,
    path_glob: &str,
    operation: FileOperation,
    observed_accurate: bool,
) -> StoreResult<FileImpactPattern> {
    sqlx::query_as::<_, FileImpactPattern>(
        "INSERT INTO file_impact_patterns (id, category, path_glob, operation, accuracy, sample_count) \
         VALUES ($1, $2, $3, $4, $5, 1) \
         ON CONFLICT (category, path_glob, operation) DO UPDATE SET \
            accuracy = (file_impact_patterns.accuracy * file_impact_patterns.sample_count + $5) \
                       / (file_impact_patterns.sample_count + 1), \
            sample_count = file_impact_patterns.sample_count + 1 \
         RETURNING *",
    )
    .bind(Uuid::new_v4())
    .bind(category)
    .bind(path_glob)
    .bind(operation)
    .bind(if observed_accurate { 1.0_f32 } else { 0.0_f32 })
    .fetch_one(pool)
    .await
    .map_err(from_sqlx)
}
