//! Per-task agent lifecycle: dispatch a task to a worker, collect its event
//! stream until a terminal state, and report back what happened.

use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use futures::StreamExt;
use sqlx::PgPool;
use uuid::Uuid;

use fleetwatch_db::models::FileOperation;

use crate::harness::{BuildWorker, WorkerEvent, WorkerHandle, WorkerTask};

/// Result of running a single agent attempt to completion or timeout.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Completed { changed_files: Vec<(String, FileOperation)> },
    Failed { message: String, exit_code: Option<i32> },
    TimedOut,
}

/// Dispatch `task` to `worker`, update `agent_id`'s heartbeat on every
/// progress event, and collect the stream until `WorkerEvent::Completed`,
/// `WorkerEvent::Failed`, or `timeout` elapses.
pub async fn run_attempt(
    pool: &PgPool,
    worker: &dyn BuildWorker,
    task: &WorkerTask,
    timeout: Duration,
) -> Result<(WorkerHandle, AttemptOutcome)> {
    let handle = worker.dispatch(task).await?;

    let outcome = tokio::time::timeout(timeout, collect(pool, worker, &handle)).await;

    match outcome {
        Ok(outcome) => Ok((handle, outcome)),
        Err(_elapsed) => {
            let _ = worker.terminate(&handle, "timed out").await;
            Ok((handle, AttemptOutcome::TimedOut))
        }
    }
}

async fn collect(pool: &PgPool, worker: &dyn BuildWorker, handle: &WorkerHandle) -> AttemptOutcome {
    let mut stream = worker.events(handle);
    let mut changed_files = Vec::new();

    while let Some(event) = stream.next().await {
        match event {
            WorkerEvent::Progress { step } => {
                if let Err(e) = fleetwatch_db::queries::agent_instances::heartbeat(pool, handle.agent_id).await {
                    tracing::warn!(agent_id = %handle.agent_id, error = %e, step = %step, "failed to record heartbeat");
                }
            }
            WorkerEvent::FileChanged { path, operation } => {
                if let Ok(op) = FileOperation::from_str(&operation) {
                    changed_files.push((path, op));
                }
            }
            WorkerEvent::Failed { message, exit_code } => {
                return AttemptOutcome::Failed { message, exit_code };
            }
            WorkerEvent::Completed => {
                return AttemptOutcome::Completed { changed_files };
            }
        }
    }

    AttemptOutcome::Completed { changed_files }
}
