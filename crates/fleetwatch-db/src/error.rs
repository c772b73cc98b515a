//! Error taxonomy visible to every store caller.
//!
//! Five kinds only: callers match on *kind*, never on message text.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("transient store error: {0}")]
    Transient(String),

    #[error("permanent store error: {0}")]
    Permanent(String),
}

impl StoreError {
    /// `true` if the caller may retry the same operation unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Map a `sqlx::Error` to a `StoreError`, inspecting Postgres SQLSTATE codes
/// for unique/foreign-key violations so callers see `Conflict` rather than a
/// generic database error.
pub fn from_sqlx(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::RowNotFound => StoreError::NotFound(err.to_string()),
        sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
            Some("23505") | Some("23503") => StoreError::Conflict(err.to_string()),
            Some("23514") | Some("22P02") => StoreError::Validation(err.to_string()),
            _ => StoreError::Permanent(err.to_string()),
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => StoreError::Transient(err.to_string()),
        _ => StoreError::Permanent(err.to_string()),
    }
}

/// Convenience wrapper used throughout `fleetwatch-db`'s query modules.
pub type StoreResult<T> = Result<T, StoreError>;
