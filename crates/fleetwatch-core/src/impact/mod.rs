//! File-impact analyser.
//!
//! Predicts which files a task will touch before it runs, combining three
//! sources: an embedded template library keyed by task category, learned
//! historical patterns, and keyword heuristics over the task's title and
//! description. Used by the planner to detect same-wave conflicts before
//! any agent has actually touched a file.

use serde::Deserialize;
use sqlx::PgPool;
use tracing::warn;

use fleetwatch_db::models::{FileOperation, ImpactSource, TaskCategory};

/// Minimal view of a task needed to predict its file impacts, before it has
/// necessarily been persisted.
pub struct TaskDraft<'a> {
    pub title: &'a str,
    pub description: &'a str,
    pub category: TaskCategory,
}

/// One predicted (path, operation) touch with a merged confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictedImpact {
    pub path: String,
    pub operation: FileOperation,
    pub confidence: f32,
    pub source: ImpactSource,
}

#[derive(Debug, Deserialize)]
struct TemplateLibrary {
    templates: Vec<Template>,
}

#[derive(Debug, Deserialize)]
struct Template {
    category: TaskCategory,
    path_glob: String,
    operation: FileOperation,
    base_confidence: f32,
}

static TEMPLATES_TOML: &str = include_str!("templates.toml");

fn load_templates() -> Vec<Template> {
    let lib: TemplateLibrary =
        toml::from_str(TEMPLATES_TOML).expect("embedded templates.toml is invalid");
    lib.templates
}

/// Ordered keyword -> (path_glob, operation) heuristics, matched
/// case-insensitively against the task's title and description.
const KEYWORD_HEURISTICS: &[(&str, &str, FileOperation)] = &[
    ("api", "src/routes/**", FileOperation::Update),
    ("migration", "migrations/**", FileOperation::Create),
    ("schema", "migrations/**", FileOperation::Update),
    ("config", "config/**", FileOperation::Update),
    ("cli", "src/cli/**", FileOperation::Update),
    ("auth", "src/auth/**", FileOperation::Update),
];

fn normalise_path(path: &str) -> String {
    let stripped = path.trim_start_matches("./").replace('\\', "/");
    stripped.trim_end_matches(|c| c == '*' || c == '/').to_string()
}

struct Candidate {
    path: String,
    operation: FileOperation,
    confidence: f32,
    source: ImpactSource,
}

/// Predict file impacts for a not-yet-dispatched task.
///
/// Falls back to template-only results if the historical-pattern lookup
/// fails against the store; a store hiccup here must never block
/// prediction.
pub async fn analyse(pool: &PgPool, task: &TaskDraft<'_>) -> Vec<PredictedImpact> {
    let mut candidates = Vec::new();

    for tmpl in load_templates()
        .into_iter()
        .filter(|t| t.category == task.category)
    {
        candidates.push(Candidate {
            path: normalise_path(&tmpl.path_glob),
            operation: tmpl.operation,
            confidence: tmpl.base_confidence,
            source: ImpactSource::AiEstimate,
        });
    }

    match fleetwatch_db::queries::file_impact_patterns::list_for_category(pool, task.category)
        .await
    {
        Ok(patterns) => {
            for p in patterns.into_iter().filter(|p| p.accuracy >= 0.6 && p.sample_count >= 3) {
                candidates.push(Candidate {
                    path: normalise_path(&p.path_glob),
                    operation: p.operation,
                    confidence: p.accuracy,
                    source: ImpactSource::PatternMatch,
                });
            }
        }
        Err(e) => warn!(error = %e, "failed to load file-impact patterns, falling back to templates only"),
    }

    let haystack = format!("{} {}", task.title, task.description).to_lowercase();
    for (keyword, path_glob, operation) in KEYWORD_HEURISTICS {
        if haystack.contains(keyword) {
            candidates.push(Candidate {
                path: normalise_path(path_glob),
                operation: *operation,
                confidence: 0.35,
                source: ImpactSource::AiEstimate,
            });
        }
    }

    merge_candidates(candidates)
}

fn merge_candidates(candidates: Vec<Candidate>) -> Vec<PredictedImpact> {
    use std::collections::HashMap;

    let mut groups: HashMap<(String, FileOperation), Vec<Candidate>> = HashMap::new();
    for c in candidates {
        groups.entry((c.path.clone(), c.operation)).or_default().push(c);
    }

    let mut merged = Vec::with_capacity(groups.len());
    for ((path, operation), group) in groups {
        let max_confidence = group
            .iter()
            .map(|c| c.confidence)
            .fold(0.0_f32, f32::max);
        let bonus = if group.len() >= 2 { 0.1 } else { 0.0 };
        let confidence = (max_confidence + bonus).min(1.0);
        let source = group
            .iter()
            .map(|c| c.source)
            .max_by_key(|s| s.priority())
            .expect("group is non-empty");

        merged.push(PredictedImpact {
            path,
            operation,
            confidence,
            source,
        });
    }
    merged
}

/// Record what a task actually touched after it ran, confirming or
/// refuting prior predictions and updating the learned-pattern table.
pub async fn record_outcome(
    pool: &PgPool,
    task_id: uuid::Uuid,
    category: TaskCategory,
    actual: &[(String, FileOperation)],
) -> anyhow::Result<()> {
    let predictions = fleetwatch_db::queries::file_impacts::list_impacts_for_task(pool, task_id).await?;

    for pred in &predictions {
        let path = normalise_path(&pred.path);
        let accurate = actual
            .iter()
            .any(|(p, op)| normalise_path(p) == path && *op == pred.operation);
        fleetwatch_db::queries::file_impacts::mark_accuracy(pool, pred.id, accurate).await?;
        fleetwatch_db::queries::file_impact_patterns::record_observation(
            pool,
            category,
            &path,
            pred.operation,
            accurate,
        )
        .await?;
    }

    for (path, op) in actual {
        let norm = normalise_path(path);
        let already_predicted = predictions
            .iter()
            .any(|p| normalise_path(&p.path) == norm && p.operation == *op);
        if !already_predicted {
            fleetwatch_db::queries::file_impact_patterns::record_observation(
                pool, category, &norm, *op, true,
            )
            .await?;
        }
    }

    Ok(())
}
