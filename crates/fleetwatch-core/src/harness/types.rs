//! Types exchanged across the build-worker boundary.
//!
//! A worker is an external process the orchestrator does not own: it is
//! dispatched a task and reports structured events back until it reaches a
//! terminal state. Nothing in this module assumes a particular worker
//! implementation.

use std::collections::HashMap;

use uuid::Uuid;

/// A task handed to a worker, materialized with everything it needs to run
/// without querying the store itself.
#[derive(Debug, Clone)]
pub struct WorkerTask {
    pub task_id: Uuid,
    pub attempt: u32,
    pub title: String,
    pub description: String,
    pub env_vars: HashMap<String, String>,
}

/// Opaque handle returned by [`super::trait_def::BuildWorker::dispatch`],
/// correlating a running worker with the `AgentInstance` row that tracks it.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    pub agent_id: Uuid,
    pub task_id: Uuid,
    pub attempt: u32,
}

/// Structured events a worker reports back while it runs.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Progress { step: String },
    FileChanged { path: String, operation: String },
    Failed { message: String, exit_code: Option<i32> },
    Completed,
}
