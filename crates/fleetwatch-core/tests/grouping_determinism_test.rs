//! Running the same evaluation-queue snapshot through the grouping pipeline
//! twice must produce the same clusters in the same order, since chat's
//! `/suggest` relies on stable output across retries.

use uuid::Uuid;

use fleetwatch_core::grouping::{cluster, score_pair, ScorableTask};
use fleetwatch_db::models::{GroupingWeights, TaskCategory};

fn sample_tasks() -> Vec<ScorableTask> {
    vec![
        ScorableTask {
            id: Uuid::new_v4(),
            title: "Add retry to webhook sender".into(),
            description: "Retry webhook delivery on transient network failure".into(),
            category: TaskCategory::Bug,
            impacted_paths: vec!["src/webhook.rs".into()],
            depends_on: vec![],
            component_tags: vec!["webhook".into()],
        },
        ScorableTask {
            id: Uuid::new_v4(),
            title: "Fix webhook sender timeout handling".into(),
            description: "Webhook delivery hangs instead of timing out".into(),
            category: TaskCategory::Bug,
            impacted_paths: vec!["src/webhook.rs".into()],
            depends_on: vec![],
            component_tags: vec!["webhook".into()],
        },
        ScorableTask {
            id: Uuid::new_v4(),
            title: "Document the billing export format".into(),
            description: "Write up the CSV schema used by the billing export job".into(),
            category: TaskCategory::Documentation,
            impacted_paths: vec!["docs/billing.md".into()],
            depends_on: vec![],
            component_tags: vec!["billing".into()],
        },
    ]
}

fn run_once(tasks: &[ScorableTask], weights: &GroupingWeights) -> Vec<Vec<Uuid>> {
    let mut pairs = Vec::new();
    for i in 0..tasks.len() {
        for j in (i + 1)..tasks.len() {
            pairs.push(score_pair(&tasks[i], &tasks[j], weights));
        }
    }
    cluster(tasks, &pairs, weights)
        .into_iter()
        .map(|g| g.task_ids)
        .collect()
}

#[test]
fn same_input_yields_same_clusters_across_runs() {
    let tasks = sample_tasks();
    let weights = GroupingWeights::default();

    let first = run_once(&tasks, &weights);
    let second = run_once(&tasks, &weights);

    assert_eq!(first, second);
}

#[test]
fn webhook_tasks_cluster_together_and_billing_stays_separate() {
    let tasks = sample_tasks();
    let weights = GroupingWeights::default();

    let groups = run_once(&tasks, &weights);

    let webhook_ids: Vec<Uuid> = tasks[0..2].iter().map(|t| t.id).collect();
    let billing_id = tasks[2].id;

    let webhook_group = groups
        .iter()
        .find(|g| webhook_ids.iter().all(|id| g.contains(id)))
        .expect("the two webhook tasks should land in the same group");

    assert!(
        !webhook_group.contains(&billing_id),
        "the unrelated billing task should not be folded into the webhook group"
    );
}
