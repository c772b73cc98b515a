//! Wave-based build-agent orchestrator.
//!
//! Grounded on `gator-core/src/orchestrator/mod.rs`'s loop shape (bounded
//! spawn via a semaphore, an `mpsc` completion channel, and a
//! cancellation-token drain with a deadline) but generalized from gator's
//! single DAG-ready-set and one harness-level `GateVerdict` to an explicit
//! wave partition (from [`crate::planner`]) and the four-way
//! [`crate::failure::FailureDecision`] the failure controller produces.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::PgPool;
use tokio::sync::{broadcast, mpsc, watch, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use fleetwatch_db::guard::SingleWriterGuard;
use fleetwatch_db::models::{ExecutionStatus, ListStatus, Task};
use fleetwatch_db::queries::{
    agent_instances, escalations, execution_runs, failure_records, file_impacts, task_lists,
    task_relationships, tasks as task_db, waves as wave_db,
};

use crate::failure::{self, FailureContext, FailureDecision};
use crate::harness::{WorkerRegistry, WorkerTask};
use crate::impact;
use crate::lifecycle::{self, AttemptOutcome};
use crate::planner::{self, PlannableImpact, PlannableTask};
use crate::state::dispatch;
use crate::token::TokenConfig;

const DEFAULT_WORKER_TYPE: &str = "build";
const RECENT_FAILURE_WINDOW: i64 = 3;
const DRAIN_DEADLINE: Duration = Duration::from_secs(10);

/// Tunables for [`run_execution`].
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Ceiling on concurrent agents across the whole orchestrator process,
    /// independent of any single list's `agent_cap`.
    pub global_agent_cap: usize,
    /// Wall time limit per agent attempt.
    pub task_timeout: Duration,
    /// Capacity of the per-execution broadcast channel.
    pub event_buffer: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            global_agent_cap: 8,
            task_timeout: Duration::from_secs(30 * 60),
            event_buffer: 256,
        }
    }
}

/// Events fanned out to dashboard and chat subscribers as an execution runs.
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    ExecutionStarted { execution_id: Uuid, list_id: Uuid },
    AgentSpawned { execution_id: Uuid, agent_id: Uuid, wave_number: i32 },
    TaskStarted { execution_id: Uuid, task_id: Uuid, agent_id: Uuid },
    TaskCompleted { execution_id: Uuid, task_id: Uuid },
    TaskFailed { execution_id: Uuid, task_id: Uuid, message: String },
    BuildStuck { execution_id: Uuid, task_id: Uuid, reason: String },
    ExecutionCompleted { execution_id: Uuid },
    ExecutionFailed { execution_id: Uuid, reason: String },
    SiaAnalysisComplete { execution_id: Uuid, escalation_id: Uuid },
}

/// Outcome of running an execution to completion, abort, or cancellation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorResult {
    Completed,
    Failed { failed_tasks: Vec<Uuid> },
    Cancelled,
}

/// Create a fresh broadcast channel sized per [`OrchestratorConfig::event_buffer`].
///
/// Subscribers should call `sender.subscribe()` before [`run_execution`]
/// starts, since events are dropped once the buffer fills rather than
/// replayed to late subscribers.
pub fn event_channel(
    capacity: usize,
) -> (broadcast::Sender<OrchestratorEvent>, broadcast::Receiver<OrchestratorEvent>) {
    broadcast::channel(capacity)
}

/// Planning phase: acquire the single-writer guard for `list_id`, partition
/// its pending tasks into waves, persist the waves, and transition the list
/// and a freshly-created execution run into `Running`.
///
/// Returns the new execution run's id.
pub async fn advance_to_planning(pool: &PgPool, list_id: Uuid) -> Result<Uuid> {
    let guard = SingleWriterGuard::acquire(pool, list_id).await?;
    let result = plan_and_persist(pool, list_id).await;
    guard.release().await?;
    result
}

async fn plan_and_persist(pool: &PgPool, list_id: Uuid) -> Result<Uuid> {
    let list = task_lists::get_list(pool, list_id).await?;
    anyhow::ensure!(
        list.status == ListStatus::Ready,
        "list {list_id} has status {}, expected ready",
        list.status
    );

    let pending = task_db::list_pending_in_wave_order(pool, list_id).await?;
    let plannable: Vec<PlannableTask> = pending
        .iter()
        .map(|t| PlannableTask { id: t.id, priority: t.priority, effort: t.effort })
        .collect();

    let edges: Vec<(Uuid, Uuid)> = task_relationships::list_dependency_edges_for_list(pool, list_id)
        .await?
        .into_iter()
        .map(|r| (r.source_task_id, r.target_task_id))
        .collect();

    let impacts: Vec<PlannableImpact> = file_impacts::list_impacts_for_list(pool, list_id)
        .await?
        .into_iter()
        .map(|i| PlannableImpact { task_id: i.task_id, path: i.path, operation: i.operation })
        .collect();

    let waves = planner::plan(&plannable, &edges, &impacts)
        .map_err(|e| anyhow::anyhow!("planning failed for list {list_id}: {e}"))?;

    let run = execution_runs::insert_run(pool, list_id).await?;

    for wave in &waves {
        let max_parallel = wave.max_parallel_agents(list.agent_cap);
        wave_db::insert_wave(pool, run.id, wave.wave_number, max_parallel).await?;
        for task_id in &wave.task_ids {
            task_db::assign_to_list(pool, *task_id, list_id, wave.wave_number).await?;
        }
    }

    task_lists::transition_status(pool, list_id, ListStatus::Ready, ListStatus::Running).await?;
    execution_runs::transition_status(pool, run.id, ExecutionStatus::Running).await?;

    Ok(run.id)
}

/// Result of one agent's attempt at one task, fed back to the wave loop.
struct TaskDone {
    task: Task,
    agent_id: Uuid,
    outcome: Result<AttemptOutcome>,
}

/// Run a planned execution wave by wave until it completes, fails, or is
/// cancelled.
///
/// `paused` gates spawning new attempts without disturbing in-flight ones;
/// `cancel` drains in-flight attempts up to [`DRAIN_DEADLINE`] and stops the
/// execution entirely.
pub async fn run_execution(
    pool: &PgPool,
    execution_id: Uuid,
    registry: Arc<WorkerRegistry>,
    token_config: Arc<TokenConfig>,
    config: &OrchestratorConfig,
    events: broadcast::Sender<OrchestratorEvent>,
    paused: watch::Receiver<bool>,
    cancel: CancellationToken,
) -> Result<OrchestratorResult> {
    let run = execution_runs::get_run(pool, execution_id).await?;
    let list = task_lists::get_list(pool, run.list_id).await?;

    let orphaned = task_db::reset_orphaned_tasks(pool, run.list_id).await?;
    if orphaned > 0 {
        tracing::warn!(list_id = %run.list_id, count = orphaned, "reset orphaned running tasks to pending");
    }

    let _ = events.send(OrchestratorEvent::ExecutionStarted { execution_id, list_id: run.list_id });

    let all_waves = wave_db::list_waves_for_execution(pool, execution_id).await?;
    let mut wave_pointer = run.wave_pointer.max(1);
    let mut failed_tasks = Vec::new();

    while let Some(wave) = all_waves.iter().find(|w| w.wave_number == wave_pointer) {
        if cancel.is_cancelled() {
            return finish_cancelled(pool, execution_id, run.list_id, &events).await;
        }

        wave_db::transition_status(pool, wave.id, ExecutionStatus::Running).await?;

        let desired = (list.agent_cap as usize)
            .min(config.global_agent_cap)
            .min(wave.max_parallel_agents.max(1) as usize)
            .max(1);

        match run_wave(
            pool,
            execution_id,
            run.list_id,
            wave.wave_number,
            desired,
            Arc::clone(&registry),
            &token_config,
            config,
            &events,
            &paused,
            &cancel,
        )
        .await?
        {
            WaveOutcome::Completed { failed } => {
                failed_tasks.extend(failed);
                wave_db::transition_status(pool, wave.id, ExecutionStatus::Completed).await?;
                execution_runs::advance_wave_pointer(pool, execution_id).await?;
                wave_pointer += 1;
            }
            WaveOutcome::Aborted { reason } => {
                execution_runs::transition_status(pool, execution_id, ExecutionStatus::Failed).await?;
                task_lists::transition_status(pool, run.list_id, ListStatus::Running, ListStatus::Failed).await?;
                let _ = events.send(OrchestratorEvent::ExecutionFailed { execution_id, reason });
                return Ok(OrchestratorResult::Failed { failed_tasks });
            }
            WaveOutcome::Cancelled => {
                return finish_cancelled(pool, execution_id, run.list_id, &events).await;
            }
        }
    }

    task_lists::refresh_progress_counts(pool, run.list_id).await?;

    if failed_tasks.is_empty() {
        execution_runs::transition_status(pool, execution_id, ExecutionStatus::Completed).await?;
        task_lists::transition_status(pool, run.list_id, ListStatus::Running, ListStatus::Completed).await?;
        let _ = events.send(OrchestratorEvent::ExecutionCompleted { execution_id });
        Ok(OrchestratorResult::Completed)
    } else {
        execution_runs::transition_status(pool, execution_id, ExecutionStatus::Failed).await?;
        task_lists::transition_status(pool, run.list_id, ListStatus::Running, ListStatus::Failed).await?;
        let _ = events.send(OrchestratorEvent::ExecutionFailed {
            execution_id,
            reason: format!("{} task(s) did not complete", failed_tasks.len()),
        });
        Ok(OrchestratorResult::Failed { failed_tasks })
    }
}

async fn finish_cancelled(
    pool: &PgPool,
    execution_id: Uuid,
    list_id: Uuid,
    events: &broadcast::Sender<OrchestratorEvent>,
) -> Result<OrchestratorResult> {
    tracing::info!(execution_id = %execution_id, "execution cancelled");
    execution_runs::transition_status(pool, execution_id, ExecutionStatus::Cancelled).await?;
    task_lists::transition_status(pool, list_id, ListStatus::Running, ListStatus::Failed).await?;
    let _ = events.send(OrchestratorEvent::ExecutionFailed {
        execution_id,
        reason: "cancelled".to_string(),
    });
    Ok(OrchestratorResult::Cancelled)
}

enum WaveOutcome {
    Completed { failed: Vec<Uuid> },
    Aborted { reason: String },
    Cancelled,
}

#[allow(clippy::too_many_arguments)]
async fn run_wave(
    pool: &PgPool,
    execution_id: Uuid,
    list_id: Uuid,
    wave_number: i32,
    desired: usize,
    registry: Arc<WorkerRegistry>,
    token_config: &TokenConfig,
    config: &OrchestratorConfig,
    events: &broadcast::Sender<OrchestratorEvent>,
    paused: &watch::Receiver<bool>,
    cancel: &CancellationToken,
) -> Result<WaveOutcome> {
    let mut spawned = Vec::with_capacity(desired);
    for _ in 0..desired {
        let agent = agent_instances::insert_agent(pool, execution_id, DEFAULT_WORKER_TYPE, wave_number).await?;
        let _ = events.send(OrchestratorEvent::AgentSpawned { execution_id, agent_id: agent.id, wave_number });
        spawned.push(agent.id);
    }
    let idle_agents: Arc<Mutex<Vec<Uuid>>> = Arc::new(Mutex::new(spawned));

    let semaphore = Arc::new(Semaphore::new(desired.max(1)));
    let (tx, mut rx) = mpsc::channel::<TaskDone>(desired.max(1) * 2);
    let mut in_flight = 0usize;
    let mut failed_in_wave = Vec::new();

    loop {
        if cancel.is_cancelled() {
            drain(&mut rx, &mut in_flight).await;
            return Ok(WaveOutcome::Cancelled);
        }

        if *paused.borrow() {
            let mut paused_clone = paused.clone();
            tokio::select! {
                _ = paused_clone.changed() => continue,
                _ = cancel.cancelled() => continue,
            }
        }

        let pending: Vec<Task> = task_db::list_pending_in_wave_order(pool, list_id)
            .await?
            .into_iter()
            .filter(|t| t.wave_position == Some(wave_number))
            .collect();

        if pending.is_empty() && in_flight == 0 {
            return Ok(WaveOutcome::Completed { failed: failed_in_wave });
        }

        let mut spawned_any = false;
        for task in pending {
            if registry.get(DEFAULT_WORKER_TYPE).is_none() {
                tracing::error!(worker = DEFAULT_WORKER_TYPE, "no build worker registered");
                break;
            }
            let Some(agent_id) = idle_agents.lock().await.pop() else { break };

            let permit = semaphore.clone().acquire_owned().await?;
            dispatch::start_task(pool, task.id).await?;
            agent_instances::assign_task(pool, agent_id, task.id).await?;
            let _ = events.send(OrchestratorEvent::TaskStarted { execution_id, task_id: task.id, agent_id });

            spawned_any = true;
            in_flight += 1;

            let tx = tx.clone();
            let pool = pool.clone();
            let registry = Arc::clone(&registry);
            let timeout = config.task_timeout;
            let attempt = task.retry_count as u32;
            let token = crate::token::generate_token(token_config, task.id, attempt);
            let mut env_vars = HashMap::new();
            env_vars.insert("FLEETWATCH_AGENT_TOKEN".to_string(), token);
            let worker_task = WorkerTask {
                task_id: task.id,
                attempt,
                title: task.title.clone(),
                description: task.description.clone(),
                env_vars,
            };

            tokio::spawn(async move {
                let outcome = match registry.get(DEFAULT_WORKER_TYPE) {
                    Some(worker) => lifecycle::run_attempt(&pool, worker, &worker_task, timeout)
                        .await
                        .map(|(_, outcome)| outcome),
                    None => Err(anyhow::anyhow!("worker '{}' disappeared from registry", DEFAULT_WORKER_TYPE)),
                };
                drop(permit);
                let _ = tx.send(TaskDone { task, agent_id, outcome }).await;
            });
        }

        if in_flight == 0 && !spawned_any {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                _ = cancel.cancelled() => {}
            }
            continue;
        }

        tokio::select! {
            Some(done) = rx.recv() => {
                in_flight -= 1;
                match handle_task_done(pool, execution_id, list_id, events, &idle_agents, cancel, done).await? {
                    TaskResolution::Ok => {}
                    TaskResolution::Failed(task_id) => failed_in_wave.push(task_id),
                    TaskResolution::Abort(reason) => {
                        drain(&mut rx, &mut in_flight).await;
                        return Ok(WaveOutcome::Aborted { reason });
                    }
                }
            }
            _ = cancel.cancelled() => continue,
        }
    }
}

async fn drain(rx: &mut mpsc::Receiver<TaskDone>, in_flight: &mut usize) {
    let deadline = tokio::time::Instant::now() + DRAIN_DEADLINE;
    while *in_flight > 0 {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(_)) => *in_flight -= 1,
            _ => break,
        }
    }
}

enum TaskResolution {
    Ok,
    Failed(Uuid),
    Abort(String),
}

#[allow(clippy::too_many_arguments)]
async fn handle_task_done(
    pool: &PgPool,
    execution_id: Uuid,
    list_id: Uuid,
    events: &broadcast::Sender<OrchestratorEvent>,
    idle_agents: &Arc<Mutex<Vec<Uuid>>>,
    cancel: &CancellationToken,
    done: TaskDone,
) -> Result<TaskResolution> {
    let TaskDone { task, agent_id, outcome } = done;

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => AttemptOutcome::Failed { message: e.to_string(), exit_code: None },
    };

    match outcome {
        AttemptOutcome::Completed { changed_files } => {
            dispatch::complete_task(pool, task.id).await?;
            task_db::clear_failure_streak(pool, task.id).await?;
            agent_instances::release(pool, agent_id, true).await?;
            impact::record_outcome(pool, task.id, task.category, &changed_files).await?;
            idle_agents.lock().await.push(agent_id);
            let _ = events.send(OrchestratorEvent::TaskCompleted { execution_id, task_id: task.id });
            Ok(TaskResolution::Ok)
        }
        AttemptOutcome::TimedOut => {
            handle_failure(
                pool,
                execution_id,
                list_id,
                events,
                idle_agents,
                cancel,
                task,
                agent_id,
                "agent attempt timed out".to_string(),
                None,
            )
            .await
        }
        AttemptOutcome::Failed { message, exit_code } => {
            handle_failure(
                pool,
                execution_id,
                list_id,
                events,
                idle_agents,
                cancel,
                task,
                agent_id,
                message,
                exit_code,
            )
            .await
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_failure(
    pool: &PgPool,
    execution_id: Uuid,
    list_id: Uuid,
    events: &broadcast::Sender<OrchestratorEvent>,
    idle_agents: &Arc<Mutex<Vec<Uuid>>>,
    cancel: &CancellationToken,
    task: Task,
    agent_id: Uuid,
    message: String,
    exit_code: Option<i32>,
) -> Result<TaskResolution> {
    let classification = failure::classify(&message, exit_code);

    let recent = failure_records::recent_for_task(pool, task.id, RECENT_FAILURE_WINDOW).await?;
    let recent_messages: Vec<String> = recent.iter().map(|r| r.message.clone()).collect();

    task_db::record_failure(pool, task.id, classification.class, &message).await?;
    failure_records::insert_record(
        pool,
        task.id,
        Some(agent_id),
        task.retry_count + 1,
        classification.class,
        classification.category,
        &message,
        None,
        None,
        None,
        None,
        None,
    )
    .await?;

    agent_instances::release(pool, agent_id, false).await?;
    let _ = events.send(OrchestratorEvent::TaskFailed { execution_id, task_id: task.id, message: message.clone() });

    let retry_max = crate::failure::DEFAULT_RETRY_MAX;
    let ctx = FailureContext {
        retry_count: task.retry_count + 1,
        retry_max,
        consecutive_failures: task.consecutive_failures + 1,
        recent_messages: &recent_messages,
    };
    let decision = failure::decide(&ctx, classification);

    match decision {
        FailureDecision::Retry(delay) => {
            idle_agents.lock().await.push(agent_id);
            let pool = pool.clone();
            let task_id = task.id;
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {
                        if let Err(e) = dispatch::retry_task(&pool, task_id).await {
                            tracing::warn!(task_id = %task_id, error = %e, "failed to requeue task after backoff");
                        }
                    }
                    _ = cancel.cancelled() => {}
                }
            });
            Ok(TaskResolution::Ok)
        }
        FailureDecision::Skip => {
            idle_agents.lock().await.push(agent_id);
            execution_runs::bump_counters(pool, execution_id, 0, 1).await?;
            Ok(TaskResolution::Failed(task.id))
        }
        FailureDecision::Escalate(reason) => {
            dispatch::escalate_task(pool, task.id).await?;
            escalations::insert_escalation(
                pool,
                task.id,
                list_id,
                reason,
                serde_json::json!({ "message": message }),
            )
            .await?;
            execution_runs::bump_counters(pool, execution_id, 0, 1).await?;
            let _ = events.send(OrchestratorEvent::BuildStuck {
                execution_id,
                task_id: task.id,
                reason: "escalated".to_string(),
            });
            idle_agents.lock().await.push(agent_id);
            Ok(TaskResolution::Failed(task.id))
        }
        FailureDecision::Abort => Ok(TaskResolution::Abort(message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_channel_has_requested_capacity() {
        let (tx, _rx) = event_channel(4);
        assert_eq!(tx.len(), 0);
    }
}
