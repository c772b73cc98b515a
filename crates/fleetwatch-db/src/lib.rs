//! Postgres-backed storage for the orchestrator.
//!
//! Every query module returns [`error::StoreError`], never a bare
//! `sqlx::Error` or `anyhow::Error` — callers outside this crate match on
//! error *kind*, never on message text.

pub mod config;
pub mod error;
pub mod guard;
pub mod models;
pub mod pool;
pub mod queries;

pub use config::DbConfig;
pub use error::{StoreError, StoreResult};
pub use guard::SingleWriterGuard;
