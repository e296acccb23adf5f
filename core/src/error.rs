use crate::states::{join_states, TaskState};
use thiserror::Error;

/// Result type alias for cycle operations
pub type Result<T> = std::result::Result<T, TaskError>;

/// Error types for the cycle engine and its substrate.
///
/// The transition-class errors (`IllegalTransition`, `DependencyIncomplete`,
/// `MissingHandover`, `EmptyHandover`) are surfaced to the agent as
/// structured JSON-RPC errors; the selection-class errors (`NoTasks`,
/// `NoSelectableTasks`) abort a cycle before any side effect; storage and
/// configuration errors are fatal to the current operation.
///
/// # Examples
///
/// ```rust
/// use cycle_core::error::TaskError;
/// use cycle_core::states::TaskState;
///
/// let err = TaskError::illegal_transition(TaskState::ReadyForPlan, TaskState::Done);
/// assert!(err.is_transition_failure());
/// assert!(err.to_string().contains("planning"));
/// ```
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskError {
    /// Task not found by the given identifier
    #[error("task not found: {0}")]
    NotFound(String),

    /// A state name that does not normalize to any known state
    #[error("unknown task state '{0}' (known states: ready_for_plan, planning, ready_for_implementation, implementing, ready_for_code_review, reviewing, ready_for_commit, committing, needs_fixes, fixing, done)")]
    UnknownState(String),

    /// Target state is not a legal successor of the current state
    #[error("illegal transition from {from} to {to}; legal successors: {}", join_states(.allowed))]
    IllegalTransition {
        from: TaskState,
        to: TaskState,
        allowed: Vec<TaskState>,
    },

    /// A work-state transition was attempted while a dependency is not done
    #[error("task {task} cannot enter a work state: dependency {dependency} is {dependency_state}, not done")]
    DependencyIncomplete {
        task: String,
        dependency: String,
        dependency_state: TaskState,
    },

    /// A dependency id does not resolve to any task
    #[error("task {task} references unknown dependency {dependency}")]
    DependencyUnresolved { task: String, dependency: String },

    /// The transition requires a handover artifact that does not exist
    #[error("transition {from} -> {to} requires artifact '{artifact}', which does not exist")]
    MissingHandover {
        from: TaskState,
        to: TaskState,
        artifact: String,
    },

    /// The required handover artifact exists but its latest version is empty
    #[error("handover artifact '{artifact}' (version {version}) is empty")]
    EmptyHandover { artifact: String, version: i64 },

    /// The store contains no tasks at all
    #[error("no tasks present")]
    NoTasks,

    /// Every candidate task is blocked; the message lists per-task reasons
    #[error("no selectable tasks: {0}")]
    NoSelectableTasks(String),

    /// No configured agent role handles the selected task's state
    #[error("no agent role configured for state {0}")]
    NoAgentConfigured(TaskState),

    /// Another cycle currently holds the advisory lock for this task
    #[error("task {0} is busy: another cycle is advancing it")]
    TaskBusy(String),

    /// The cycle deadline passed; further mutations are refused
    #[error("deadline_exceeded: the cycle timebox has elapsed")]
    DeadlineExceeded,

    /// The active agent role lacks the capability for this operation
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Validation error with details
    #[error("validation error: {0}")]
    Validation(String),

    /// Database operation error
    #[error("database error: {0}")]
    Database(String),

    /// Wire-protocol error from method-surface operations
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Configuration error, fatal at startup
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Serialization / deserialization failure
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal system error
    #[error("internal error: {0}")]
    Internal(String),
}

impl TaskError {
    /// Create a not-found error for a task id
    pub fn not_found_task(id: &str) -> Self {
        Self::NotFound(format!("task '{id}'"))
    }

    /// Create a not-found error for a requirement key
    pub fn not_found_requirement(key: &str) -> Self {
        Self::NotFound(format!("requirement '{key}'"))
    }

    /// Create a not-found error for an artifact
    pub fn not_found_artifact(task_id: &str, name: &str) -> Self {
        Self::NotFound(format!("artifact '{name}' of task '{task_id}'"))
    }

    /// Create a validation error for an empty field
    pub fn empty_field(field: &str) -> Self {
        Self::Validation(format!("field '{field}' cannot be empty"))
    }

    /// Create an illegal-transition error carrying the legal successor set
    pub fn illegal_transition(from: TaskState, to: TaskState) -> Self {
        Self::IllegalTransition {
            from,
            to,
            allowed: from.successors().to_vec(),
        }
    }

    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, TaskError::NotFound(_))
    }

    /// Check if this error belongs to the transition-failure class the agent
    /// is expected to recover from within a cycle
    pub fn is_transition_failure(&self) -> bool {
        matches!(
            self,
            TaskError::IllegalTransition { .. }
                | TaskError::DependencyIncomplete { .. }
                | TaskError::DependencyUnresolved { .. }
                | TaskError::MissingHandover { .. }
                | TaskError::EmptyHandover { .. }
        )
    }

    /// Check if this error aborts a cycle before any side effect
    pub fn is_selection_failure(&self) -> bool {
        matches!(self, TaskError::NoTasks | TaskError::NoSelectableTasks(_))
    }

    /// Check if this error indicates a storage problem
    pub fn is_database(&self) -> bool {
        matches!(self, TaskError::Database(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructors() {
        let err = TaskError::not_found_task("T1");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "task not found: task 'T1'");

        let err = TaskError::empty_field("title");
        assert_eq!(
            err.to_string(),
            "validation error: field 'title' cannot be empty"
        );
    }

    #[test]
    fn test_illegal_transition_lists_successors() {
        let err = TaskError::illegal_transition(TaskState::Reviewing, TaskState::Done);
        assert!(err.is_transition_failure());

        let msg = err.to_string();
        assert!(msg.contains("ready_for_commit"));
        assert!(msg.contains("needs_fixes"));
    }

    #[test]
    fn test_terminal_state_message() {
        let err = TaskError::illegal_transition(TaskState::Done, TaskState::Planning);
        assert!(err.to_string().contains("none (terminal state)"));
    }

    #[test]
    fn test_error_classes() {
        assert!(TaskError::NoTasks.is_selection_failure());
        assert!(TaskError::NoSelectableTasks("all blocked".into()).is_selection_failure());
        assert!(!TaskError::NoTasks.is_transition_failure());

        assert!(TaskError::MissingHandover {
            from: TaskState::Planning,
            to: TaskState::ReadyForImplementation,
            artifact: "implementation_plan".into(),
        }
        .is_transition_failure());

        assert!(TaskError::Database("locked".into()).is_database());
    }
}
