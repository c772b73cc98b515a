//! The `BuildWorker` trait -- the adapter interface to an external build
//! worker implementation.
//!
//! Individual worker implementations are out of scope here: they are
//! processes that report structured events back, and this crate only
//! specifies the boundary. The trait is object-safe so it can be stored as
//! `Box<dyn BuildWorker>` in the [`super::WorkerRegistry`].

use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;

use super::types::{WorkerEvent, WorkerHandle, WorkerTask};

/// Adapter interface to a build-worker implementation.
///
/// # Object Safety
///
/// Every method returns a concrete type or a boxed trait object, so `dyn
/// BuildWorker` can be stored in collections such as [`super::WorkerRegistry`].
#[async_trait]
pub trait BuildWorker: Send + Sync {
    /// Human-readable name for this worker type (e.g. `"build"`).
    fn name(&self) -> &str;

    /// Dispatch a task to this worker type, returning a handle correlating
    /// the run with the task and attempt.
    async fn dispatch(&self, task: &WorkerTask) -> Result<WorkerHandle>;

    /// Stream of events from a dispatched run, until [`WorkerEvent::Completed`]
    /// or [`WorkerEvent::Failed`].
    fn events(&self, handle: &WorkerHandle) -> Pin<Box<dyn Stream<Item = WorkerEvent> + Send>>;

    /// Terminate a running worker (used by `/stop` and pool-shrink).
    async fn terminate(&self, handle: &WorkerHandle, reason: &str) -> Result<()>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn BuildWorker) {}
};
