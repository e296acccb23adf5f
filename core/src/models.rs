use crate::states::TaskState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// A unit of LLM-driven work advanced one state transition per cycle.
///
/// Tasks are created externally (plan ingestion), mutated only through the
/// method surface via the transition validator, and never destroyed by the
/// core. All references between tasks are opaque string identifiers resolved
/// through the store; there are no in-memory task pointers.
///
/// # Examples
///
/// ```rust
/// use cycle_core::models::Task;
/// use cycle_core::states::TaskState;
/// use chrono::Utc;
///
/// let task = Task {
///     id: "T-auth".to_string(),
///     title: "Auth".to_string(),
///     description: "Add JWT-based authentication".to_string(),
///     state: TaskState::ReadyForPlan,
///     priority: 7,
///     owner: "backend".to_string(),
///     tags: vec!["security".to_string()],
///     dependencies: vec![],
///     notes: vec![],
///     created_at: Utc::now(),
///     updated_at: Utc::now(),
/// };
///
/// assert!(task.can_transition_to(TaskState::Planning));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Opaque unique identifier
    pub id: String,
    /// Brief task title
    pub title: String,
    /// Detailed task description
    pub description: String,
    /// Current lifecycle state
    pub state: TaskState,
    /// Urgency, higher is more urgent (conventionally 1..10)
    pub priority: i64,
    /// Free-form owner label
    pub owner: String,
    /// Free-form tags
    pub tags: Vec<String>,
    /// Ids of tasks that must be done before this one enters a work state
    pub dependencies: Vec<String>,
    /// Append-only timestamped notes written via `tasks.append_note`
    pub notes: Vec<TaskNote>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Strictly increases on any field mutation
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Whether the state machine permits moving this task to `new_state`.
    pub fn can_transition_to(&self, new_state: TaskState) -> bool {
        self.state.can_transition_to(new_state)
    }
}

/// A note appended to a task without changing its state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskNote {
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Data transfer object for creating new tasks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewTask {
    /// Opaque unique identifier
    pub id: String,
    /// Brief task title
    pub title: String,
    /// Detailed task description
    pub description: String,
    /// Urgency, higher is more urgent
    #[serde(default = "default_priority")]
    pub priority: i64,
    /// Free-form owner label
    #[serde(default)]
    pub owner: String,
    /// Free-form tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Ids of prerequisite tasks; every id must resolve
    #[serde(default)]
    pub dependencies: Vec<String>,
}

fn default_priority() -> i64 {
    5 // medium priority
}

impl NewTask {
    /// Create a NewTask with default priority and no owner, tags or
    /// dependencies.
    pub fn new(id: impl Into<String>, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            priority: default_priority(),
            owner: String::new(),
            tags: vec![],
            dependencies: vec![],
        }
    }

    /// Set the priority (builder style, used heavily in tests and ingestion)
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Set the dependency list
    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }
}

/// Filter criteria for querying tasks.
///
/// All fields are optional; multiple fields combine with AND logic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFilter {
    /// Filter by task state
    pub state: Option<TaskState>,

    /// Filter by owner label
    pub owner: Option<String>,

    /// Keep only tasks with priority >= this value
    pub min_priority: Option<i64>,

    /// Maximum number of tasks to return (for pagination)
    pub limit: Option<u32>,

    /// Number of tasks to skip (for pagination)
    pub offset: Option<u32>,
}

/// Classification of a requirement record
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequirementKind {
    Functional,
    NonFunctional,
    Constraint,
    Risk,
    Acceptance,
}

impl RequirementKind {
    /// Canonical storage name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            RequirementKind::Functional => "functional",
            RequirementKind::NonFunctional => "non_functional",
            RequirementKind::Constraint => "constraint",
            RequirementKind::Risk => "risk",
            RequirementKind::Acceptance => "acceptance",
        }
    }
}

impl FromStr for RequirementKind {
    type Err = crate::error::TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "functional" => Ok(RequirementKind::Functional),
            "non_functional" | "nonfunctional" => Ok(RequirementKind::NonFunctional),
            "constraint" => Ok(RequirementKind::Constraint),
            "risk" => Ok(RequirementKind::Risk),
            "acceptance" => Ok(RequirementKind::Acceptance),
            _ => Err(crate::error::TaskError::Validation(format!(
                "unknown requirement kind: '{s}'"
            ))),
        }
    }
}

impl fmt::Display for RequirementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A requirement record consumed from the externally-parsed plan.
///
/// Requirements are read-only during cycles; only plan ingestion writes them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Requirement {
    /// Opaque unique identifier
    pub id: String,
    /// Stable human-readable key, e.g. "FR-12"
    pub key: String,
    /// Brief requirement title
    pub title: String,
    /// Full requirement text
    pub text: String,
    /// Requirement classification
    pub kind: RequirementKind,
}

/// Data transfer object for inserting requirements at ingestion time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewRequirement {
    pub key: String,
    pub title: String,
    pub text: String,
    #[serde(alias = "type")]
    pub kind: RequirementKind,
}

/// A named, versioned handover document attached to a task.
///
/// Artifacts are append-only: an upsert with an existing name creates the
/// next version; earlier versions remain retrievable. Versions per
/// `(task_id, name)` are contiguous starting at 1.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artifact {
    /// Owning task id
    pub task_id: String,
    /// Artifact name, e.g. "implementation_plan"
    pub name: String,
    /// Monotonically increasing version per (task_id, name)
    pub version: i64,
    /// Document body, typically markdown
    pub content: String,
    /// Opaque structured sidecar
    pub meta: Option<serde_json::Value>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Lightweight reference to one artifact version
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactRef {
    pub name: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Final outcome of one cycle, recorded in the audit log
#[derive(Debug, Clone, Copy, Hash, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    Success,
    Error,
    Blocked,
}

impl CycleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleOutcome::Success => "success",
            CycleOutcome::Error => "error",
            CycleOutcome::Blocked => "blocked",
        }
    }
}

impl FromStr for CycleOutcome {
    type Err = crate::error::TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(CycleOutcome::Success),
            "error" => Ok(CycleOutcome::Error),
            "blocked" => Ok(CycleOutcome::Blocked),
            _ => Err(crate::error::TaskError::Validation(format!(
                "unknown cycle outcome: '{s}'"
            ))),
        }
    }
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One handshake follow-up exchange, captured verbatim in the audit entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FollowUp {
    /// The question sent to the agent
    pub question: String,
    /// The agent's textual reply, if any
    pub response: Option<String>,
    /// Task state observed after the exchange
    pub state_after: TaskState,
    /// When the follow-up was emitted
    pub asked_at: DateTime<Utc>,
}

/// Per-cycle provenance record. Append-only, never edited.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    /// Auto-increment primary key
    pub id: i64,
    /// Opaque cycle identifier
    pub cycle_id: String,
    /// The task the cycle advanced
    pub task_id: String,
    /// Task state before the cycle
    pub prev_state: TaskState,
    /// Task state after the cycle
    pub next_state: TaskState,
    /// Agent role identifier that ran the cycle
    pub actor: String,
    /// Why the selector chose this task
    pub selection_reason: String,
    /// References to the inputs the cycle was rehydrated from
    pub inputs_summary: String,
    /// Names and versions of artifacts the cycle produced
    pub outputs_summary: String,
    /// External commands observed during the cycle
    pub commands: Vec<String>,
    /// Final cycle result
    pub result: CycleOutcome,
    /// Free-form note, e.g. the handshake failure explanation
    pub note: Option<String>,
    /// Handshake follow-up exchanges, in order
    pub follow_ups: Vec<FollowUp>,
    /// Record timestamp
    pub created_at: DateTime<Utc>,
}

/// Data transfer object for appending audit entries
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewAuditEntry {
    pub cycle_id: String,
    pub task_id: String,
    pub prev_state: TaskState,
    pub next_state: TaskState,
    pub actor: String,
    pub selection_reason: String,
    pub inputs_summary: String,
    pub outputs_summary: String,
    pub commands: Vec<String>,
    pub result: CycleOutcome,
    pub note: Option<String>,
    pub follow_ups: Vec<FollowUp>,
}

/// Aggregate counts reported by the audit logger
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuditReport {
    /// Total number of tasks in the store
    pub total_tasks: u64,
    /// Task counts keyed by state
    pub tasks_by_state: HashMap<TaskState, u64>,
    /// Total number of recorded cycles
    pub total_cycles: u64,
    /// Fraction of tasks in `done`, 0.0..=1.0
    pub completion_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task(state: TaskState) -> Task {
        Task {
            id: "T1".to_string(),
            title: "Test Task".to_string(),
            description: "Test description".to_string(),
            state,
            priority: 5,
            owner: "tester".to_string(),
            tags: vec![],
            dependencies: vec![],
            notes: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_task_transition_delegation() {
        let task = sample_task(TaskState::ReadyForPlan);
        assert!(task.can_transition_to(TaskState::Planning));
        assert!(!task.can_transition_to(TaskState::Done));
    }

    #[test]
    fn test_new_task_defaults() {
        let json = r#"{"id": "T1", "title": "Auth", "description": "Add auth"}"#;
        let new_task: NewTask = serde_json::from_str(json).unwrap();
        assert_eq!(new_task.priority, 5);
        assert!(new_task.dependencies.is_empty());
        assert!(new_task.tags.is_empty());
    }

    #[test]
    fn test_new_task_builders() {
        let new_task = NewTask::new("T2", "Title", "Desc")
            .with_priority(8)
            .with_dependencies(vec!["T1".to_string()]);
        assert_eq!(new_task.priority, 8);
        assert_eq!(new_task.dependencies, vec!["T1".to_string()]);
    }

    #[test]
    fn test_requirement_kind_roundtrip() {
        for kind in [
            RequirementKind::Functional,
            RequirementKind::NonFunctional,
            RequirementKind::Constraint,
            RequirementKind::Risk,
            RequirementKind::Acceptance,
        ] {
            assert_eq!(kind.as_str().parse::<RequirementKind>().unwrap(), kind);
        }

        assert_eq!(
            "non-functional".parse::<RequirementKind>().unwrap(),
            RequirementKind::NonFunctional
        );
        assert!("wish".parse::<RequirementKind>().is_err());
    }

    #[test]
    fn test_new_requirement_accepts_type_alias() {
        let json = r#"{"key": "FR-1", "title": "Login", "text": "Users log in", "type": "functional"}"#;
        let req: NewRequirement = serde_json::from_str(json).unwrap();
        assert_eq!(req.kind, RequirementKind::Functional);
    }

    #[test]
    fn test_artifact_ref_display() {
        let artifact = ArtifactRef {
            name: "implementation_plan".to_string(),
            version: 3,
            created_at: Utc::now(),
        };
        assert_eq!(artifact.to_string(), "implementation_plan@3");
    }

    #[test]
    fn test_cycle_outcome_roundtrip() {
        for outcome in [CycleOutcome::Success, CycleOutcome::Error, CycleOutcome::Blocked] {
            assert_eq!(outcome.as_str().parse::<CycleOutcome>().unwrap(), outcome);
        }
    }
}
