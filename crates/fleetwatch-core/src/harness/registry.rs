//! Worker registry -- a named collection of available build-worker adapters.
//!
//! The orchestrator looks up a worker implementation by the `AgentInstance`'s
//! `agent_type` tag at dispatch time.

use std::collections::HashMap;

use super::trait_def::BuildWorker;

/// A collection of registered [`BuildWorker`] implementations, keyed by name.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: HashMap<String, Box<dyn BuildWorker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker adapter, replacing any existing one under the same
    /// name and returning it.
    pub fn register(&mut self, worker: impl BuildWorker + 'static) -> Option<Box<dyn BuildWorker>> {
        let name = worker.name().to_string();
        self.workers.insert(name, Box::new(worker))
    }

    pub fn get(&self, name: &str) -> Option<&dyn BuildWorker> {
        self.workers.get(name).map(|b| b.as_ref())
    }

    /// The order is not guaranteed (HashMap iteration order).
    pub fn list(&self) -> Vec<&str> {
        self.workers.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("workers", &self.workers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::types::{WorkerEvent, WorkerHandle, WorkerTask};
    use anyhow::Result;
    use async_trait::async_trait;
    use futures::Stream;
    use std::pin::Pin;
    use uuid::Uuid;

    struct FakeWorker {
        worker_name: String,
    }

    impl FakeWorker {
        fn new(name: &str) -> Self {
            Self { worker_name: name.to_string() }
        }
    }

    #[async_trait]
    impl BuildWorker for FakeWorker {
        fn name(&self) -> &str {
            &self.worker_name
        }

        async fn dispatch(&self, task: &WorkerTask) -> Result<WorkerHandle> {
            Ok(WorkerHandle { agent_id: Uuid::new_v4(), task_id: task.task_id, attempt: task.attempt })
        }

        fn events(&self, _handle: &WorkerHandle) -> Pin<Box<dyn Stream<Item = WorkerEvent> + Send>> {
            Box::pin(futures::stream::empty())
        }

        async fn terminate(&self, _handle: &WorkerHandle, _reason: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn registry_starts_empty() {
        let registry = WorkerRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert!(registry.list().is_empty());
    }

    #[test]
    fn register_and_get() {
        let mut registry = WorkerRegistry::new();
        let old = registry.register(FakeWorker::new("build"));
        assert!(old.is_none());
        assert_eq!(registry.get("build").unwrap().name(), "build");
    }

    #[test]
    fn register_replaces_existing() {
        let mut registry = WorkerRegistry::new();
        registry.register(FakeWorker::new("build"));
        let old = registry.register(FakeWorker::new("build"));
        assert!(old.is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn get_missing_returns_none() {
        let registry = WorkerRegistry::new();
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn list_returns_all_names() {
        let mut registry = WorkerRegistry::new();
        registry.register(FakeWorker::new("build"));
        registry.register(FakeWorker::new("spec"));
        let mut names = registry.list();
        names.sort();
        assert_eq!(names, vec!["build", "spec"]);
    }
}
