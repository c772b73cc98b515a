//! Integration test for the wave-based build-agent orchestrator, run
//! against a real ephemeral PostgreSQL instance.

use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use fleetwatch_core::harness::{BuildWorker, WorkerEvent, WorkerHandle, WorkerRegistry, WorkerTask};
use fleetwatch_core::orchestrator::{
    self, event_channel, OrchestratorConfig, OrchestratorEvent, OrchestratorResult,
};
use fleetwatch_core::token::TokenConfig;
use fleetwatch_db::models::{ListStatus, TaskCategory, TaskEffort, TaskStatus};
use fleetwatch_db::queries::{task_lists, tasks as task_db};

/// A worker that completes every task it's handed after a single progress
/// event, counting how many tasks it ran.
struct AlwaysSucceeds {
    runs: AtomicUsize,
}

#[async_trait]
impl BuildWorker for AlwaysSucceeds {
    fn name(&self) -> &str {
        "build"
    }

    async fn dispatch(&self, task: &WorkerTask) -> Result<WorkerHandle> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(WorkerHandle { agent_id: Uuid::new_v4(), task_id: task.task_id, attempt: task.attempt })
    }

    fn events(&self, _handle: &WorkerHandle) -> Pin<Box<dyn Stream<Item = WorkerEvent> + Send>> {
        Box::pin(futures::stream::iter(vec![
            WorkerEvent::Progress { step: "running".into() },
            WorkerEvent::FileChanged { path: "src/lib.rs".into(), operation: "update".into() },
            WorkerEvent::Completed,
        ]))
    }

    async fn terminate(&self, _handle: &WorkerHandle, _reason: &str) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn executes_a_single_wave_list_to_completion() {
    let (pool, db_name) = fleetwatch_test_utils::create_test_db().await;

    let project_id = Uuid::new_v4();
    let list = task_lists::insert_list(&pool, "release 12", project_id, 2).await.unwrap();

    for i in 0..3 {
        let task = task_db::insert_task(
            &pool,
            &format!("T-{i}"),
            project_id,
            &format!("task {i}"),
            "does a thing",
            TaskCategory::Task,
            TaskEffort::Small,
            0,
        )
        .await
        .unwrap();
        task_db::assign_to_list(&pool, task.id, list.id, 0).await.unwrap();
    }

    task_lists::transition_status(&pool, list.id, ListStatus::Draft, ListStatus::Ready)
        .await
        .unwrap();

    let execution_id = orchestrator::advance_to_planning(&pool, list.id).await.unwrap();

    let mut registry = WorkerRegistry::new();
    let worker = Arc::new(AlwaysSucceeds { runs: AtomicUsize::new(0) });
    registry.register(SharedWorker(Arc::clone(&worker)));

    let (events_tx, mut events_rx) = event_channel(64);
    let (_paused_tx, paused_rx) = watch::channel(false);
    let cancel = CancellationToken::new();
    let token_config = TokenConfig::new(b"orchestrator-test-secret".to_vec());

    let result = orchestrator::run_execution(
        &pool,
        execution_id,
        Arc::new(registry),
        Arc::new(token_config),
        &OrchestratorConfig::default(),
        events_tx,
        paused_rx,
        cancel,
    )
    .await
    .unwrap();

    assert_eq!(result, OrchestratorResult::Completed);
    assert_eq!(worker.runs.load(Ordering::SeqCst), 3);

    let tasks = task_db::list_tasks_for_list(&pool, list.id).await.unwrap();
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Completed));

    let mut saw_execution_completed = false;
    while let Ok(event) = events_rx.try_recv() {
        if matches!(event, OrchestratorEvent::ExecutionCompleted { .. }) {
            saw_execution_completed = true;
        }
    }
    assert!(saw_execution_completed);

    fleetwatch_test_utils::drop_test_db(&db_name).await;
}

/// Wraps an `Arc<AlwaysSucceeds>` so it can be registered by value while the
/// test keeps its own handle for assertions.
struct SharedWorker(Arc<AlwaysSucceeds>);

#[async_trait]
impl BuildWorker for SharedWorker {
    fn name(&self) -> &str {
        self.0.name()
    }

    async fn dispatch(&self, task: &WorkerTask) -> Result<WorkerHandle> {
        self.0.dispatch(task).await
    }

    fn events(&self, handle: &WorkerHandle) -> Pin<Box<dyn Stream<Item = WorkerEvent> + Send>> {
        self.0.events(handle)
    }

    async fn terminate(&self, handle: &WorkerHandle, reason: &str) -> Result<()> {
        self.0.terminate(handle, reason).await
    }
}

#[tokio::test]
async fn retries_a_transient_failure_then_completes() {
    let (pool, db_name) = fleetwatch_test_utils::create_test_db().await;

    let project_id = Uuid::new_v4();
    let list = task_lists::insert_list(&pool, "flaky release", project_id, 1).await.unwrap();

    let task = task_db::insert_task(
        &pool,
        "T-flaky",
        project_id,
        "flaky task",
        "times out once then passes",
        TaskCategory::Task,
        TaskEffort::Small,
        0,
    )
    .await
    .unwrap();
    task_db::assign_to_list(&pool, task.id, list.id, 0).await.unwrap();

    task_lists::transition_status(&pool, list.id, ListStatus::Draft, ListStatus::Ready)
        .await
        .unwrap();

    let execution_id = orchestrator::advance_to_planning(&pool, list.id).await.unwrap();

    let mut registry = WorkerRegistry::new();
    registry.register(FlakyOnceWorker { attempts: AtomicUsize::new(0) });

    let (events_tx, _events_rx) = event_channel(64);
    let (_paused_tx, paused_rx) = watch::channel(false);
    let cancel = CancellationToken::new();
    let token_config = TokenConfig::new(b"orchestrator-test-secret".to_vec());

    let result = orchestrator::run_execution(
        &pool,
        execution_id,
        Arc::new(registry),
        Arc::new(token_config),
        &OrchestratorConfig::default(),
        events_tx,
        paused_rx,
        cancel,
    )
    .await
    .unwrap();

    assert_eq!(result, OrchestratorResult::Completed);

    let reloaded = task_db::get_task(&pool, task.id).await.unwrap();
    assert_eq!(reloaded.status, TaskStatus::Completed);
    assert_eq!(reloaded.retry_count, 1);

    fleetwatch_test_utils::drop_test_db(&db_name).await;
}

/// Fails the first attempt with a network-flavoured message (transient,
/// retried), succeeds on the second.
struct FlakyOnceWorker {
    attempts: AtomicUsize,
}

#[async_trait]
impl BuildWorker for FlakyOnceWorker {
    fn name(&self) -> &str {
        "build"
    }

    async fn dispatch(&self, task: &WorkerTask) -> Result<WorkerHandle> {
        Ok(WorkerHandle { agent_id: Uuid::new_v4(), task_id: task.task_id, attempt: task.attempt })
    }

    fn events(&self, _handle: &WorkerHandle) -> Pin<Box<dyn Stream<Item = WorkerEvent> + Send>> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt == 0 {
            Box::pin(futures::stream::iter(vec![WorkerEvent::Failed {
                message: "ECONNRESET talking to build backend".into(),
                exit_code: None,
            }]))
        } else {
            Box::pin(futures::stream::iter(vec![WorkerEvent::Completed]))
        }
    }

    async fn terminate(&self, _handle: &WorkerHandle, _reason: &str) -> Result<()> {
        Ok(())
    }
}

/// The retry path sleeps for the failure controller's backoff before
/// requeuing; give it a moment in case the test runs on a slow CI box.
#[allow(dead_code)]
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1100)).await;
}
