//! Row types and enums for every entity the orchestrator persists.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Error returned when parsing any of this module's enums from a string.
#[derive(Debug, Clone)]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {:?}", self.kind, self.value)
    }
}

impl std::error::Error for ParseEnumError {}

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:expr),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
        #[sqlx(type_name = "text", rename_all = "snake_case")]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let s = match self {
                    $(Self::$variant => $text),+
                };
                f.write_str(s)
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ParseEnumError { kind: stringify!($name), value: other.to_owned() }),
                }
            }
        }
    };
}

string_enum!(TaskCategory {
    Feature => "feature",
    Bug => "bug",
    Task => "task",
    Documentation => "documentation",
    Test => "test",
    Infrastructure => "infrastructure",
    Refactor => "refactor",
});

string_enum!(TaskEffort {
    Trivial => "trivial",
    Small => "small",
    Medium => "medium",
    Large => "large",
    Epic => "epic",
});

impl TaskEffort {
    /// Ordinal used by the planner's `(priority desc, effort asc, id asc)`
    /// tie-break. Smaller effort sorts first.
    pub fn rank(self) -> u8 {
        match self {
            TaskEffort::Trivial => 0,
            TaskEffort::Small => 1,
            TaskEffort::Medium => 2,
            TaskEffort::Large => 3,
            TaskEffort::Epic => 4,
        }
    }
}

string_enum!(TaskStatus {
    Pending => "pending",
    Running => "running",
    Completed => "completed",
    Failed => "failed",
    Skipped => "skipped",
    Escalated => "escalated",
});

string_enum!(ListStatus {
    Draft => "draft",
    Ready => "ready",
    Running => "running",
    Paused => "paused",
    Completed => "completed",
    Failed => "failed",
});

string_enum!(FileOperation {
    Create => "create",
    Update => "update",
    Delete => "delete",
    Read => "read",
});

string_enum!(ImpactSource {
    UserDeclared => "user_declared",
    Validated => "validated",
    AiEstimate => "ai_estimate",
    PatternMatch => "pattern_match",
});

impl ImpactSource {
    /// Priority used when merging impacts from multiple sources; higher
    /// wins. Mirrors the order in the doc comment on [`ImpactSource`].
    pub fn priority(self) -> u8 {
        match self {
            ImpactSource::UserDeclared => 3,
            ImpactSource::Validated => 2,
            ImpactSource::AiEstimate => 1,
            ImpactSource::PatternMatch => 0,
        }
    }
}

string_enum!(ExecutionStatus {
    Created => "created",
    Planning => "planning",
    Running => "running",
    Paused => "paused",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
});

string_enum!(AgentStatus {
    Idle => "idle",
    Busy => "busy",
    Blocked => "blocked",
    Terminated => "terminated",
});

string_enum!(ErrorClass {
    Transient => "transient",
    Permanent => "permanent",
    Unknown => "unknown",
});

string_enum!(ErrorCategory {
    Network => "network",
    Validation => "validation",
    Compilation => "compilation",
    TestFailure => "test",
    Filesystem => "filesystem",
    Database => "database",
    Timeout => "timeout",
    Memory => "memory",
    Process => "process",
    General => "general",
});

string_enum!(EscalationReason {
    MaxRetriesExceeded => "max_retries_exceeded",
    NoProgress => "no_progress",
    RepeatedFailure => "repeated_failure",
    PermanentError => "permanent_error",
});

string_enum!(SuggestionStatus {
    Pending => "pending",
    Accepted => "accepted",
    Rejected => "rejected",
    Expired => "expired",
});

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// The unit of work. See the allowed status transitions in
/// `fleetwatch_core::state`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: Uuid,
    pub human_id: String,
    pub project_id: Uuid,
    pub list_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub category: TaskCategory,
    pub effort: TaskEffort,
    pub priority: i32,
    pub status: TaskStatus,
    pub wave_position: Option<i32>,
    pub retry_count: i32,
    pub consecutive_failures: i32,
    pub last_error_class: Option<ErrorClass>,
    pub last_error_message: Option<String>,
    pub escalated_to_sia: bool,
    pub escalated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An ordered bag of tasks ready for execution.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskList {
    pub id: Uuid,
    pub name: String,
    pub project_id: Uuid,
    pub status: ListStatus,
    pub total_tasks: i32,
    pub completed_tasks: i32,
    pub failed_tasks: i32,
    pub agent_cap: i32,
    pub wave_count: i32,
    pub created_at: DateTime<Utc>,
}

/// A predicted or declared (path, operation) touch for a task.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FileImpact {
    pub id: Uuid,
    pub task_id: Uuid,
    pub path: String,
    pub operation: FileOperation,
    pub confidence: f32,
    pub source: ImpactSource,
    pub accurate: Option<bool>,
    pub created_at: DateTime<Utc>,
}

/// A directed dependency edge between two tasks.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskRelationship {
    pub source_task_id: Uuid,
    pub target_task_id: Uuid,
    pub relationship_type: String,
}

/// A planner-derived wave within an execution.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Wave {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub wave_number: i32,
    pub max_parallel_agents: i32,
    pub status: ExecutionStatus,
}

/// One attempt to drain a list's waves.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExecutionRun {
    pub id: Uuid,
    pub list_id: Uuid,
    pub run_number: i32,
    pub status: ExecutionStatus,
    pub wave_pointer: i32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub completed_count: i32,
    pub failed_count: i32,
}

/// An active worker owned by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AgentInstance {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub agent_type: String,
    pub current_wave: i32,
    pub current_task_id: Option<Uuid>,
    pub status: AgentStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub tasks_completed: i32,
    pub tasks_failed: i32,
}

/// Append-only record of one task attempt's failure.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FailureRecord {
    pub id: i64,
    pub task_id: Uuid,
    pub agent_id: Option<Uuid>,
    pub attempt: i32,
    pub error_class: ErrorClass,
    pub error_category: ErrorCategory,
    pub message: String,
    pub stdout_tail: Option<String>,
    pub stderr_tail: Option<String>,
    pub current_step: Option<String>,
    pub file_path: Option<String>,
    pub stack: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Promotion of a repeatedly failing task to offline analysis.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Escalation {
    pub id: Uuid,
    pub task_id: Uuid,
    pub list_id: Uuid,
    pub reason_code: EscalationReason,
    pub context: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub analysed_at: Option<DateTime<Utc>>,
    pub analysis_result: Option<serde_json::Value>,
}

/// A proposed grouping of related evaluation-queue tasks.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GroupingSuggestion {
    pub id: Uuid,
    pub status: SuggestionStatus,
    pub candidate_task_ids: Vec<Uuid>,
    pub proposed_name: String,
    pub reasoning: String,
    pub similarity_score: f32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Append-only log of outbound chat messages.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChatMessage {
    pub id: i64,
    pub bot_type: String,
    pub chat_id: String,
    pub category: String,
    pub text: String,
    pub task_id: Option<Uuid>,
    pub list_id: Option<Uuid>,
    pub agent_id: Option<Uuid>,
    pub upstream_message_id: Option<String>,
    pub sent_at: DateTime<Utc>,
}

/// Learned (category, path-glob, operation) accuracy, feeding the
/// file-impact analyser's historical-pattern source.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FileImpactPattern {
    pub id: Uuid,
    pub category: TaskCategory,
    pub path_glob: String,
    pub operation: FileOperation,
    pub accuracy: f32,
    pub sample_count: i32,
}

/// Per-project grouping-engine weights.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GroupingWeights {
    pub project_id: Uuid,
    pub file_weight: f32,
    pub dependency_weight: f32,
    pub semantic_weight: f32,
    pub category_weight: f32,
    pub component_weight: f32,
    pub similarity_threshold: f32,
    pub max_group_size: i32,
    pub min_group_size: i32,
}

impl Default for GroupingWeights {
    fn default() -> Self {
        Self {
            project_id: Uuid::nil(),
            file_weight: 0.25,
            dependency_weight: 0.30,
            semantic_weight: 0.20,
            category_weight: 0.10,
            component_weight: 0.15,
            similarity_threshold: 0.6,
            max_group_size: 20,
            min_group_size: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<T: FromStr<Err = ParseEnumError> + fmt::Display + PartialEq + Copy>(v: T) {
        let s = v.to_string();
        let parsed: T = s.parse().expect("should parse");
        assert!(parsed == v);
    }

    #[test]
    fn task_category_roundtrip() {
        for v in [
            TaskCategory::Feature,
            TaskCategory::Bug,
            TaskCategory::Task,
            TaskCategory::Documentation,
            TaskCategory::Test,
            TaskCategory::Infrastructure,
            TaskCategory::Refactor,
        ] {
            roundtrip(v);
        }
    }

    #[test]
    fn task_effort_rank_orders_smallest_first() {
        assert!(TaskEffort::Trivial.rank() < TaskEffort::Small.rank());
        assert!(TaskEffort::Small.rank() < TaskEffort::Medium.rank());
        assert!(TaskEffort::Medium.rank() < TaskEffort::Large.rank());
        assert!(TaskEffort::Large.rank() < TaskEffort::Epic.rank());
    }

    #[test]
    fn task_status_roundtrip() {
        for v in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Skipped,
            TaskStatus::Escalated,
        ] {
            roundtrip(v);
        }
    }

    #[test]
    fn file_operation_roundtrip() {
        for v in [
            FileOperation::Create,
            FileOperation::Update,
            FileOperation::Delete,
            FileOperation::Read,
        ] {
            roundtrip(v);
        }
    }

    #[test]
    fn impact_source_priority_order() {
        assert!(ImpactSource::UserDeclared.priority() > ImpactSource::Validated.priority());
        assert!(ImpactSource::Validated.priority() > ImpactSource::AiEstimate.priority());
        assert!(ImpactSource::AiEstimate.priority() > ImpactSource::PatternMatch.priority());
    }

    #[test]
    fn invalid_enum_value_is_rejected() {
        let result = "bogus".parse::<TaskStatus>();
        assert!(result.is_err());
    }

    #[test]
    fn grouping_weights_defaults_match_documented_values() {
        let w = GroupingWeights::default();
        assert_eq!(w.file_weight, 0.25);
        assert_eq!(w.dependency_weight, 0.30);
        assert_eq!(w.semantic_weight, 0.20);
        assert_eq!(w.category_weight, 0.10);
        assert_eq!(w.component_weight, 0.15);
        assert_eq!(w.similarity_threshold, 0.6);
        assert_eq!(w.max_group_size, 20);
        assert_eq!(w.min_group_size, 2);
    }
}
