//! Build-worker adapter interface.
//!
//! This module defines the [`BuildWorker`] trait that external worker
//! implementations would conform to, plus the supporting types
//! ([`WorkerHandle`], [`WorkerEvent`], [`WorkerTask`]) and the
//! [`WorkerRegistry`] for runtime lookup by `agent_type`.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator
//!     |
//!     v
//! WorkerRegistry --get("build")--> &dyn BuildWorker
//!     |                                   |
//!     |   dispatch(task) -----------------+
//!     |        |
//!     |        v
//!     |   WorkerHandle { agent_id, task_id, attempt }
//!     |        |
//!     |   events(handle) --> Stream<WorkerEvent>
//!     |   terminate(handle, reason)
//! ```
//!
//! No concrete worker is implemented here: individual build-worker
//! implementations are external collaborators whose internals this crate
//! does not specify.

pub mod registry;
pub mod trait_def;
pub mod types;

pub use registry::WorkerRegistry;
pub use trait_def::BuildWorker;
pub use types::{WorkerEvent, WorkerHandle, WorkerTask};
