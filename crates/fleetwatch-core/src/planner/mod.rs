//! Parallelism planner.
//!
//! Partitions a list's tasks into waves using Kahn-style topological
//! layering, additionally refusing to place two tasks in the same wave
//! when their predicted file impacts conflict. Planning is a pure,
//! synchronous function of `(tasks, depends_on, impacts)` plus a fixed
//! tie-break order, so the same inputs always produce the same waves.

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use uuid::Uuid;

use fleetwatch_db::models::{FileOperation, TaskEffort};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("dependency cycle detected among tasks: {0:?}")]
    Cycle(Vec<Uuid>),
}

/// Minimal view of a task needed for planning.
#[derive(Debug, Clone)]
pub struct PlannableTask {
    pub id: Uuid,
    pub priority: i32,
    pub effort: TaskEffort,
}

/// A single (path, operation) touch declared or predicted for a task.
#[derive(Debug, Clone)]
pub struct PlannableImpact {
    pub task_id: Uuid,
    pub path: String,
    pub operation: FileOperation,
}

/// One wave of tasks that can run concurrently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaveAssignment {
    pub wave_number: i32,
    pub task_ids: Vec<Uuid>,
}

impl WaveAssignment {
    pub fn max_parallel_agents(&self, agent_cap: i32) -> i32 {
        agent_cap.min(self.task_ids.len() as i32)
    }
}

/// Strip a leading `./`/backslashes and trailing glob stars/slashes so
/// `"src/api/**"` and `"src/api/"` compare equal.
fn normalise_path(path: &str) -> String {
    let stripped = path.trim_start_matches("./").replace('\\', "/");
    stripped.trim_end_matches(|c| c == '*' || c == '/').to_string()
}

fn conflicts(a: &[(&str, FileOperation)], b: &[(&str, FileOperation)]) -> bool {
    for (path_a, op_a) in a {
        for (path_b, op_b) in b {
            if normalise_path(path_a) != normalise_path(path_b) {
                continue;
            }
            if *op_a == FileOperation::Read && *op_b == FileOperation::Read {
                continue;
            }
            return true;
        }
    }
    false
}

/// Partition `tasks` into waves, respecting `edges` (depends_on pairs, as
/// `(source, target)` meaning `target` depends on `source`) and refusing
/// same-wave placement for tasks whose `impacts` intersect on
/// `(path, non-READ op)`.
pub fn plan(
    tasks: &[PlannableTask],
    edges: &[(Uuid, Uuid)],
    impacts: &[PlannableImpact],
) -> Result<Vec<WaveAssignment>, PlanError> {
    let mut indegree: HashMap<Uuid, usize> = tasks.iter().map(|t| (t.id, 0)).collect();
    let mut dependents: HashMap<Uuid, Vec<Uuid>> = HashMap::new();

    for &(source, target) in edges {
        *indegree.entry(target).or_insert(0) += 1;
        dependents.entry(source).or_default().push(target);
    }

    let mut impacts_by_task: HashMap<Uuid, Vec<(&str, FileOperation)>> = HashMap::new();
    for imp in impacts {
        impacts_by_task
            .entry(imp.task_id)
            .or_default()
            .push((imp.path.as_str(), imp.operation));
    }

    let by_id: HashMap<Uuid, &PlannableTask> = tasks.iter().map(|t| (t.id, t)).collect();
    let mut remaining: HashSet<Uuid> = tasks.iter().map(|t| t.id).collect();
    let mut waves = Vec::new();
    let mut wave_number = 1;

    while !remaining.is_empty() {
        let mut ready: Vec<Uuid> = remaining
            .iter()
            .copied()
            .filter(|id| indegree.get(id).copied().unwrap_or(0) == 0)
            .collect();

        if ready.is_empty() {
            let mut stuck: Vec<Uuid> = remaining.into_iter().collect();
            stuck.sort();
            return Err(PlanError::Cycle(stuck));
        }

        sort_by_tiebreak(&mut ready, &by_id);

        let mut this_wave: Vec<Uuid> = Vec::new();
        let mut wave_impacts: Vec<(&str, FileOperation)> = Vec::new();

        for id in ready {
            let empty = Vec::new();
            let task_impacts = impacts_by_task.get(&id).unwrap_or(&empty);
            if conflicts(&wave_impacts, task_impacts) {
                continue;
            }
            this_wave.push(id);
            wave_impacts.extend(task_impacts.iter().copied());
        }

        if this_wave.is_empty() {
            // Every ready task conflicts with another ready task; place the
            // single highest-priority one alone so progress is still made.
            let mut ready_again: Vec<Uuid> = remaining
                .iter()
                .copied()
                .filter(|id| indegree.get(id).copied().unwrap_or(0) == 0)
                .collect();
            sort_by_tiebreak(&mut ready_again, &by_id);
            this_wave.push(ready_again[0]);
        }

        for id in &this_wave {
            remaining.remove(id);
            if let Some(deps) = dependents.get(id) {
                for dep in deps {
                    if let Some(count) = indegree.get_mut(dep) {
                        *count = count.saturating_sub(1);
                    }
                }
            }
        }

        waves.push(WaveAssignment {
            wave_number,
            task_ids: this_wave,
        });
        wave_number += 1;
    }

    Ok(waves)
}

fn sort_by_tiebreak(ids: &mut [Uuid], by_id: &HashMap<Uuid, &PlannableTask>) {
    ids.sort_by(|a, b| {
        let ta = by_id[a];
        let tb = by_id[b];
        tb.priority
            .cmp(&ta.priority)
            .then(ta.effort.rank().cmp(&tb.effort.rank()))
            .then(a.cmp(b))
    });
}
