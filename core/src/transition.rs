//! Transition decision logic shared by `validate_and_transition` and its
//! read-only sibling `inspect_transition`.
//!
//! The functions here are pure: the store loads the task, its dependencies
//! and the latest handover artifact, and this module decides. Keeping the
//! decision out of the storage layer means both the mutating and the
//! inspecting path classify a proposed transition identically.

use crate::error::TaskError;
use crate::models::Task;
use crate::states::{required_handover, TaskState};
use serde::{Deserialize, Serialize};

/// Tagged reasons a proposed transition is refused.
///
/// Consumers must handle every tag; the method surface turns each into a
/// structured JSON-RPC error with a machine-readable `data` payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum TransitionBlocker {
    /// The target is not a legal successor of the current state
    IllegalTransition { allowed: Vec<TaskState> },
    /// A work-state entry found a dependency that is not done
    DependencyIncomplete {
        dependency: String,
        dependency_state: TaskState,
    },
    /// A dependency id does not resolve to any task
    DependencyUnresolved { dependency: String },
    /// The required handover artifact does not exist
    MissingHandover { artifact: String },
    /// The required handover artifact's latest version is empty
    EmptyHandover { artifact: String, version: i64 },
}

impl TransitionBlocker {
    /// Human-readable description of what would need to change for the
    /// transition to succeed. Returned by `inspect_transition` for the
    /// agent's use.
    pub fn needed_action(&self) -> String {
        match self {
            TransitionBlocker::IllegalTransition { allowed } => format!(
                "choose one of the legal successor states: {}",
                crate::states::join_states(allowed)
            ),
            TransitionBlocker::DependencyIncomplete {
                dependency,
                dependency_state,
            } => format!("complete dependency task '{dependency}' (currently {dependency_state})"),
            TransitionBlocker::DependencyUnresolved { dependency } => {
                format!("remove or create the unresolved dependency '{dependency}'")
            }
            TransitionBlocker::MissingHandover { artifact } => {
                format!("create a non-empty '{artifact}' artifact before transitioning")
            }
            TransitionBlocker::EmptyHandover { artifact, version } => format!(
                "replace the empty '{artifact}' artifact (version {version}) with real content"
            ),
        }
    }

    /// Convert the blocker into the matching [`TaskError`] for the mutating
    /// path.
    pub fn into_error(self, task: &Task, to: TaskState) -> TaskError {
        match self {
            TransitionBlocker::IllegalTransition { allowed } => TaskError::IllegalTransition {
                from: task.state,
                to,
                allowed,
            },
            TransitionBlocker::DependencyIncomplete {
                dependency,
                dependency_state,
            } => TaskError::DependencyIncomplete {
                task: task.id.clone(),
                dependency,
                dependency_state,
            },
            TransitionBlocker::DependencyUnresolved { dependency } => {
                TaskError::DependencyUnresolved {
                    task: task.id.clone(),
                    dependency,
                }
            }
            TransitionBlocker::MissingHandover { artifact } => TaskError::MissingHandover {
                from: task.state,
                to,
                artifact,
            },
            TransitionBlocker::EmptyHandover { artifact, version } => {
                TaskError::EmptyHandover { artifact, version }
            }
        }
    }
}

/// Result of the read-only `inspect_transition` path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransitionInspection {
    pub task_id: String,
    pub from: TaskState,
    pub to: TaskState,
    /// True when the transition would currently succeed
    pub legal: bool,
    /// The first blocker found, in validation order
    pub blocker: Option<TransitionBlocker>,
    /// What would need to change, one entry per detected blocker
    pub needed: Vec<String>,
}

impl TransitionInspection {
    /// Build a passing inspection.
    pub fn ok(task: &Task, to: TaskState) -> Self {
        Self {
            task_id: task.id.clone(),
            from: task.state,
            to,
            legal: true,
            blocker: None,
            needed: vec![],
        }
    }

    /// Build a failing inspection from the detected blockers.
    pub fn blocked(task: &Task, to: TaskState, blockers: Vec<TransitionBlocker>) -> Self {
        let needed = blockers.iter().map(TransitionBlocker::needed_action).collect();
        Self {
            task_id: task.id.clone(),
            from: task.state,
            to,
            legal: false,
            blocker: blockers.into_iter().next(),
            needed,
        }
    }
}

/// Check the state-machine legality of a proposed transition.
pub fn check_successor(current: TaskState, to: TaskState) -> Result<(), TransitionBlocker> {
    if current.can_transition_to(to) {
        Ok(())
    } else {
        Err(TransitionBlocker::IllegalTransition {
            allowed: current.successors().to_vec(),
        })
    }
}

/// Check the dependency gate for work-state entry. `resolved` holds the
/// states of the dependencies the store could resolve, in the task's
/// declared order; a `None` entry marks an unresolvable id. A task with an
/// empty dependency set always passes.
pub fn check_dependencies(
    to: TaskState,
    resolved: &[(String, Option<TaskState>)],
) -> Result<(), TransitionBlocker> {
    if !to.is_work_state() {
        return Ok(());
    }

    for (dependency, state) in resolved {
        match state {
            None => {
                return Err(TransitionBlocker::DependencyUnresolved {
                    dependency: dependency.clone(),
                })
            }
            Some(state) if *state != TaskState::Done => {
                return Err(TransitionBlocker::DependencyIncomplete {
                    dependency: dependency.clone(),
                    dependency_state: *state,
                })
            }
            Some(_) => {}
        }
    }

    Ok(())
}

/// Check the handover gate: `latest` is the newest version of the required
/// artifact (if the transition requires one and the store found it).
pub fn check_handover(
    from: TaskState,
    to: TaskState,
    latest: Option<(i64, &str)>,
) -> Result<(), TransitionBlocker> {
    let Some(artifact) = required_handover(from, to) else {
        return Ok(());
    };

    match latest {
        None => Err(TransitionBlocker::MissingHandover {
            artifact: artifact.to_string(),
        }),
        Some((version, content)) if content.trim().is_empty() => {
            Err(TransitionBlocker::EmptyHandover {
                artifact: artifact.to_string(),
                version,
            })
        }
        Some(_) => Ok(()),
    }
}
