//! Task lifecycle state machine.
//!
//! The eleven states and their legal successors are the contract every other
//! component builds on: the selector skips terminal tasks, the transition
//! validator only accepts successor states, and the handshake reports against
//! the same table. The required-handover map is deliberately a single
//! constant so the validator and the handshake can never disagree about
//! which artifact a transition demands.

use crate::error::{Result, TaskError};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Lifecycle states a task moves through.
///
/// The forward path is `ready_for_plan → planning → ready_for_implementation
/// → implementing → ready_for_code_review → reviewing → ready_for_commit →
/// committing → done`. Every work state can instead drop into `needs_fixes`,
/// which leads through `fixing` back to code review. `done` is terminal.
///
/// # Examples
///
/// ```rust
/// use cycle_core::states::TaskState;
///
/// let state = TaskState::Planning;
/// assert!(state.can_transition_to(TaskState::ReadyForImplementation));
/// assert!(!state.can_transition_to(TaskState::Done));
/// assert!(!state.can_transition_to(TaskState::Planning)); // self-loops are not legal
/// ```
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting for a planning cycle to pick the task up
    ReadyForPlan,
    /// An agent is producing the implementation plan
    Planning,
    /// Plan accepted, waiting for implementation
    ReadyForImplementation,
    /// An agent is implementing the plan
    Implementing,
    /// Changes made, waiting for review
    ReadyForCodeReview,
    /// An agent is reviewing the changes
    Reviewing,
    /// Review passed, waiting for commit
    ReadyForCommit,
    /// An agent is committing the work
    Committing,
    /// Something went wrong; an operator or fix cycle must intervene
    NeedsFixes,
    /// An agent is applying fixes
    Fixing,
    /// Terminal state; no legal successors
    Done,
}

/// All states, in forward-path order.
pub const ALL_STATES: [TaskState; 11] = [
    TaskState::ReadyForPlan,
    TaskState::Planning,
    TaskState::ReadyForImplementation,
    TaskState::Implementing,
    TaskState::ReadyForCodeReview,
    TaskState::Reviewing,
    TaskState::ReadyForCommit,
    TaskState::Committing,
    TaskState::NeedsFixes,
    TaskState::Fixing,
    TaskState::Done,
];

/// The single authoritative map of transitions that require a handover
/// artifact. The transition validator rejects the transition if the named
/// artifact does not exist at a non-empty latest version.
pub const REQUIRED_HANDOVERS: &[(TaskState, TaskState, &str)] = &[
    (
        TaskState::Planning,
        TaskState::ReadyForImplementation,
        "implementation_plan",
    ),
    (
        TaskState::Implementing,
        TaskState::ReadyForCodeReview,
        "change_summary",
    ),
    (
        TaskState::Reviewing,
        TaskState::ReadyForCommit,
        "review_findings",
    ),
    (
        TaskState::Reviewing,
        TaskState::NeedsFixes,
        "review_findings",
    ),
    (TaskState::Fixing, TaskState::ReadyForCodeReview, "fix_plan"),
    (TaskState::Committing, TaskState::Done, "commit_summary"),
];

/// Look up the handover artifact required by a transition, if any.
pub fn required_handover(from: TaskState, to: TaskState) -> Option<&'static str> {
    REQUIRED_HANDOVERS
        .iter()
        .find(|(f, t, _)| *f == from && *t == to)
        .map(|(_, _, name)| *name)
}

impl TaskState {
    /// Canonical wire/storage name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::ReadyForPlan => "ready_for_plan",
            TaskState::Planning => "planning",
            TaskState::ReadyForImplementation => "ready_for_implementation",
            TaskState::Implementing => "implementing",
            TaskState::ReadyForCodeReview => "ready_for_code_review",
            TaskState::Reviewing => "reviewing",
            TaskState::ReadyForCommit => "ready_for_commit",
            TaskState::Committing => "committing",
            TaskState::NeedsFixes => "needs_fixes",
            TaskState::Fixing => "fixing",
            TaskState::Done => "done",
        }
    }

    /// Legal successor states.
    pub fn successors(&self) -> &'static [TaskState] {
        match self {
            TaskState::ReadyForPlan => &[TaskState::Planning],
            TaskState::Planning => &[TaskState::ReadyForImplementation, TaskState::NeedsFixes],
            TaskState::ReadyForImplementation => &[TaskState::Implementing],
            TaskState::Implementing => &[TaskState::ReadyForCodeReview, TaskState::NeedsFixes],
            TaskState::ReadyForCodeReview => &[TaskState::Reviewing],
            TaskState::Reviewing => &[TaskState::ReadyForCommit, TaskState::NeedsFixes],
            TaskState::ReadyForCommit => &[TaskState::Committing],
            TaskState::Committing => &[TaskState::Done, TaskState::NeedsFixes],
            TaskState::NeedsFixes => &[TaskState::Fixing],
            TaskState::Fixing => &[TaskState::ReadyForCodeReview, TaskState::NeedsFixes],
            TaskState::Done => &[],
        }
    }

    /// Whether `new_state` is a legal successor of this state.
    /// Self-loops are never legal.
    pub fn can_transition_to(&self, new_state: TaskState) -> bool {
        self.successors().contains(&new_state)
    }

    /// Terminal states have no successors.
    pub fn is_terminal(&self) -> bool {
        self.successors().is_empty()
    }

    /// Work states require all dependencies to be `done` before entry.
    pub fn is_work_state(&self) -> bool {
        matches!(
            self,
            TaskState::Planning
                | TaskState::Implementing
                | TaskState::Reviewing
                | TaskState::Committing
        )
    }

    /// Parse a state name, tolerating case, separator and common spelling
    /// variants. Unknown names fail with [`TaskError::UnknownState`], whose
    /// message lists the canonical names.
    pub fn parse(input: &str) -> Result<TaskState> {
        let canonical: String = input
            .trim()
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c == '-' || c == ' ' { '_' } else { c })
            .collect();

        let state = match canonical.as_str() {
            "ready_for_plan" | "ready_to_plan" | "ready_for_planning" => TaskState::ReadyForPlan,
            "planning" | "in_planning" => TaskState::Planning,
            "ready_for_implementation" | "ready_for_impl" | "ready_for_implementing"
            | "ready_for_implemention" => TaskState::ReadyForImplementation,
            "implementing" | "in_implementation" => TaskState::Implementing,
            "ready_for_code_review" | "ready_for_codereview" | "ready_for_review" => {
                TaskState::ReadyForCodeReview
            }
            "reviewing" | "in_review" | "review" => TaskState::Reviewing,
            "ready_for_commit" | "ready_to_commit" => TaskState::ReadyForCommit,
            "committing" | "commiting" => TaskState::Committing,
            "needs_fixes" | "needs_fix" | "need_fixes" | "needsfixes" => TaskState::NeedsFixes,
            "fixing" | "in_fixing" => TaskState::Fixing,
            "done" | "complete" | "completed" | "finished" => TaskState::Done,
            _ => return Err(TaskError::UnknownState(input.to_string())),
        };

        Ok(state)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self> {
        TaskState::parse(s)
    }
}

// Serialize as the canonical snake_case name; accept aliases on input so
// agent-supplied states round-trip through the same normalization as the
// method surface.
impl Serialize for TaskState {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TaskState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        TaskState::parse(&raw).map_err(de::Error::custom)
    }
}

/// Render a successor list for error messages.
pub fn join_states(states: &[TaskState]) -> String {
    if states.is_empty() {
        return "none (terminal state)".to_string();
    }
    states
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
