//! Grouping engine.
//!
//! Scores pairs of evaluation-queue tasks for similarity and greedily
//! clusters them into grouping suggestions. Nothing here is auto-applied —
//! a suggestion only becomes a `TaskList` when a human accepts it through
//! the chat command/approval loop.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use fleetwatch_db::models::{GroupingWeights, TaskCategory};

/// Minimal view of a task needed for scoring, independent of persistence.
#[derive(Debug, Clone)]
pub struct ScorableTask {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub category: TaskCategory,
    pub impacted_paths: Vec<String>,
    pub depends_on: Vec<Uuid>,
    pub component_tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredPair {
    pub a: Uuid,
    pub b: Uuid,
    pub score: f32,
}

fn jaccard<T: Eq + std::hash::Hash>(a: &HashSet<T>, b: &HashSet<T>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f32;
    let union = a.union(b).count() as f32;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

fn tokenize(title: &str) -> HashSet<String> {
    title
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| w.len() > 3)
        .collect()
}

/// Strip a leading `./`/backslashes and trailing glob stars/slashes so
/// `"src/api/**"` and `"src/api/"` are treated as the same path.
fn normalise_path(path: &str) -> String {
    let stripped = path.trim_start_matches("./").replace('\\', "/");
    stripped.trim_end_matches(|c| c == '*' || c == '/').to_string()
}

/// `|A∩B| / max(|A|,|B|)` over normalised paths, rather than Jaccard —
/// a task that touches one file out of five still fully overlaps a task
/// that touches only that file.
fn max_overlap(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    let denom = a.len().max(b.len());
    if denom == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f32 / denom as f32
}

/// Score a pair of tasks across the five weighted components: file
/// overlap, dependency relation, semantic title+description overlap,
/// category match, and component-tag overlap.
pub fn score_pair(a: &ScorableTask, b: &ScorableTask, weights: &GroupingWeights) -> ScoredPair {
    let file_a: HashSet<String> = a.impacted_paths.iter().map(|p| normalise_path(p)).collect();
    let file_b: HashSet<String> = b.impacted_paths.iter().map(|p| normalise_path(p)).collect();
    let file_score = max_overlap(&file_a, &file_b);

    let dependency_score = if a.depends_on.contains(&b.id) || b.depends_on.contains(&a.id) {
        1.0
    } else if a.depends_on.iter().any(|d| b.depends_on.contains(d)) {
        0.7
    } else {
        0.0
    };

    let semantic_a: HashSet<String> = tokenize(&a.title)
        .into_iter()
        .chain(tokenize(&a.description))
        .collect();
    let semantic_b: HashSet<String> = tokenize(&b.title)
        .into_iter()
        .chain(tokenize(&b.description))
        .collect();
    let semantic_score = jaccard(&semantic_a, &semantic_b);

    let category_score = if a.category == b.category { 1.0 } else { 0.0 };

    let tags_a: HashSet<&String> = a.component_tags.iter().collect();
    let tags_b: HashSet<&String> = b.component_tags.iter().collect();
    let component_score = jaccard(&tags_a, &tags_b);

    let score = weights.file_weight * file_score
        + weights.dependency_weight * dependency_score
        + weights.semantic_weight * semantic_score
        + weights.category_weight * category_score
        + weights.component_weight * component_score;

    ScoredPair { a: a.id, b: b.id, score }
}

/// A proposed cluster of related tasks, before a name has been generated.
#[derive(Debug, Clone)]
pub struct GroupCandidate {
    pub task_ids: Vec<Uuid>,
    pub best_score: f32,
}

/// Greedy union-find clustering over pairs sorted by score descending.
/// Merges while the resulting group stays at or below `max_group_size`;
/// discards groups below `min_group_size`.
pub fn cluster(
    tasks: &[ScorableTask],
    pairs: &[ScoredPair],
    weights: &GroupingWeights,
) -> Vec<GroupCandidate> {
    let mut parent: HashMap<Uuid, Uuid> = tasks.iter().map(|t| (t.id, t.id)).collect();
    let mut size: HashMap<Uuid, usize> = tasks.iter().map(|t| (t.id, 1)).collect();
    let mut best_score: HashMap<Uuid, f32> = HashMap::new();

    fn find(parent: &mut HashMap<Uuid, Uuid>, x: Uuid) -> Uuid {
        let p = parent[&x];
        if p == x {
            x
        } else {
            let root = find(parent, p);
            parent.insert(x, root);
            root
        }
    }

    let mut sorted_pairs: Vec<&ScoredPair> = pairs
        .iter()
        .filter(|p| p.score >= weights.similarity_threshold)
        .collect();
    sorted_pairs.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());

    for pair in sorted_pairs {
        let root_a = find(&mut parent, pair.a);
        let root_b = find(&mut parent, pair.b);
        if root_a == root_b {
            continue;
        }
        let combined = size[&root_a] + size[&root_b];
        if combined > weights.max_group_size as usize {
            continue;
        }
        parent.insert(root_a, root_b);
        size.insert(root_b, combined);
        let merged_score = best_score
            .get(&root_a)
            .copied()
            .unwrap_or(pair.score)
            .max(best_score.get(&root_b).copied().unwrap_or(pair.score))
            .max(pair.score);
        best_score.insert(root_b, merged_score);
    }

    let mut groups: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for t in tasks {
        let root = find(&mut parent, t.id);
        groups.entry(root).or_default().push(t.id);
    }

    groups
        .into_iter()
        .filter(|(_, members)| members.len() >= weights.min_group_size as usize)
        .map(|(root, members)| GroupCandidate {
            best_score: best_score.get(&root).copied().unwrap_or(0.0),
            task_ids: members,
        })
        .collect()
}

/// Name a group: the most common >3-letter word shared by at least half
/// its titles, else a generic fallback.
pub fn name_group(titles: &[&str]) -> String {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for title in titles {
        for word in tokenize(title) {
            *counts.entry(word).or_insert(0) += 1;
        }
    }

    let threshold = titles.len().div_ceil(2).max(1);
    let mut candidates: Vec<(&String, &usize)> =
        counts.iter().filter(|(_, &count)| count >= threshold).collect();
    candidates.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));

    match candidates.first() {
        Some((word, _)) => capitalize(word),
        None => format!("Related Tasks ({} items)", titles.len()),
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
