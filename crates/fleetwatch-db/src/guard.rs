//! Single-writer advisory lock, scoped to a task list.
//!
//! Promotes the "at most one active execution run per list" invariant to a
//! first-class store operation instead of relying solely on a partial unique
//! index, which is racy between the existence check and the insert.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;

/// Hold of the advisory lock on `(list_id)`. Releases on drop via an
/// explicit async `release`; dropping without calling `release` leaves the
/// lock held until the owning connection is returned to the pool, which for
/// a `PgPool` happens once the borrowed connection goes out of scope.
pub struct SingleWriterGuard {
    conn: sqlx::pool::PoolConnection<sqlx::Postgres>,
    key: i64,
}

impl SingleWriterGuard {
    /// Try to acquire the advisory lock scoped to `list_id`. Returns
    /// `StoreError::Conflict` if another writer already holds it.
    pub async fn acquire(pool: &PgPool, list_id: Uuid) -> Result<Self, StoreError> {
        let mut conn = pool
            .acquire()
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;

        let key = lock_key(list_id);
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(key)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| StoreError::Transient(e.to_string()))?;

        if !acquired {
            return Err(StoreError::Conflict(format!(
                "list {list_id} already has an active writer"
            )));
        }

        Ok(Self { conn, key })
    }

    /// Release the lock explicitly. Safe to call more than once; later calls
    /// are no-ops.
    pub async fn release(mut self) -> Result<()> {
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(self.key)
            .execute(&mut *self.conn)
            .await
            .context("failed to release single-writer advisory lock")?;
        Ok(())
    }
}

/// Fold a list id's UUID into a signed 64-bit key for `pg_try_advisory_lock`.
fn lock_key(list_id: Uuid) -> i64 {
    let bytes = list_id.as_bytes();
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[0..8]);
    i64::from_le_bytes(buf)
}
