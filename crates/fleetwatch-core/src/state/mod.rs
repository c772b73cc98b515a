//! Task state machine transitions.
//!
//! Validates and executes state transitions for tasks, enforcing the
//! allowed transition graph and optimistic locking.

pub mod dispatch;

use anyhow::{bail, Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use fleetwatch_db::models::TaskStatus;
use fleetwatch_db::queries::tasks as db;

/// The task state machine.
///
/// Enforces the valid transition graph:
///
/// ```text
/// pending   -> running
/// pending   -> skipped
/// running   -> completed
/// running   -> failed
/// failed    -> pending    (retry)
/// failed    -> escalated
/// escalated -> pending    (operator override)
/// ```
pub struct TaskStateMachine;

impl TaskStateMachine {
    /// Check whether a transition from `from` to `to` is a valid edge in
    /// the state graph.
    pub fn is_valid_transition(from: TaskStatus, to: TaskStatus) -> bool {
        matches!(
            (from, to),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Pending, TaskStatus::Skipped)
                | (TaskStatus::Running, TaskStatus::Completed)
                | (TaskStatus::Running, TaskStatus::Failed)
                | (TaskStatus::Failed, TaskStatus::Pending)
                | (TaskStatus::Failed, TaskStatus::Escalated)
                | (TaskStatus::Escalated, TaskStatus::Pending)
        )
    }

    /// Execute a state transition with optimistic locking.
    ///
    /// Returns an error if the transition is not a legal edge, or if the
    /// current status in the database does not match `from`.
    pub async fn transition(
        pool: &PgPool,
        task_id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<()> {
        if !Self::is_valid_transition(from, to) {
            bail!("invalid state transition: {from} -> {to} for task {task_id}");
        }

        db::transition_status(pool, task_id, from, to)
            .await
            .with_context(|| format!("failed to transition task {task_id} from {from} to {to}"))?;

        Ok(())
    }

    /// Validate that all dependencies of a task are `completed`.
    pub async fn check_dependencies(pool: &PgPool, task_id: Uuid) -> Result<()> {
        let relationships =
            fleetwatch_db::queries::task_relationships::list_relationships_for_task(pool, task_id)
                .await?;

        for rel in relationships
            .iter()
            .filter(|r| r.target_task_id == task_id && r.relationship_type == "depends_on")
        {
            let dep = db::get_task(pool, rel.source_task_id).await?;
            if dep.status != TaskStatus::Completed {
                bail!(
                    "dependency {} for task {task_id} has status {}, expected completed",
                    rel.source_task_id,
                    dep.status
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions_are_accepted() {
        assert!(TaskStateMachine::is_valid_transition(
            TaskStatus::Pending,
            TaskStatus::Running
        ));
        assert!(TaskStateMachine::is_valid_transition(
            TaskStatus::Running,
            TaskStatus::Completed
        ));
        assert!(TaskStateMachine::is_valid_transition(
            TaskStatus::Failed,
            TaskStatus::Pending
        ));
        assert!(TaskStateMachine::is_valid_transition(
            TaskStatus::Failed,
            TaskStatus::Escalated
        ));
        assert!(TaskStateMachine::is_valid_transition(
            TaskStatus::Escalated,
            TaskStatus::Pending
        ));
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        assert!(!TaskStateMachine::is_valid_transition(
            TaskStatus::Pending,
            TaskStatus::Completed
        ));
        assert!(!TaskStateMachine::is_valid_transition(
            TaskStatus::Completed,
            TaskStatus::Running
        ));
        assert!(!TaskStateMachine::is_valid_transition(
            TaskStatus::Escalated,
            TaskStatus::Completed
        ));
    }
}
