//! Dependency-aware task selection.
//!
//! The selector is a pure function over a snapshot of all tasks: given the
//! same snapshot and the same configuration it always returns the same
//! selection, so a cycle's `selection_reason` in the audit log is
//! reproducible provenance rather than a guess.

use crate::error::{Result, TaskError};
use crate::models::Task;
use crate::states::TaskState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Selection algorithms. Unknown names are rejected when the configuration
/// is deserialized, which makes a bad `selection.algorithm` a startup error.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SelectionAlgorithm {
    #[default]
    PriorityDependency,
}

/// Tie-breaking rule applied after priority (and leaf preference).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TieBreaker {
    #[default]
    OldestUpdated,
    NewestCreated,
    Alphabetical,
}

/// Selector configuration, loaded from the `selection.*` config keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct SelectorConfig {
    pub algorithm: SelectionAlgorithm,
    /// When true, any dependency not in `done` blocks the dependent task
    pub dependency_strict: bool,
    /// Prefer tasks no other open task depends on
    pub prefer_leaf_tasks: bool,
    pub tie_breaker: TieBreaker,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            algorithm: SelectionAlgorithm::PriorityDependency,
            dependency_strict: true,
            prefer_leaf_tasks: true,
            tie_breaker: TieBreaker::OldestUpdated,
        }
    }
}

/// A candidate that could not be selected, with the reason.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockedCandidate {
    pub task_id: String,
    pub title: String,
    pub reason: String,
}

/// The selected task plus the rationale that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Selection {
    pub task: Task,
    /// Human-readable rationale enumerating the criteria that applied
    pub reason: String,
    /// Number of non-terminal tasks considered
    pub candidates: usize,
    /// Number of candidates that were not blocked
    pub available: usize,
    /// Candidates removed by the dependency gate, with reasons
    pub blocked: Vec<BlockedCandidate>,
}

/// Choose the next task to advance.
///
/// # Errors
/// * [`TaskError::NoTasks`] when the snapshot is empty
/// * [`TaskError::NoSelectableTasks`] when every candidate is blocked (the
///   message lists per-task reasons)
pub fn select_next(tasks: &[Task], config: &SelectorConfig) -> Result<Selection> {
    // The algorithm field exists so new policies can be added without
    // changing the call sites; priority_dependency is the only one today.
    let SelectionAlgorithm::PriorityDependency = config.algorithm;

    if tasks.is_empty() {
        return Err(TaskError::NoTasks);
    }

    let states: HashMap<&str, TaskState> =
        tasks.iter().map(|t| (t.id.as_str(), t.state)).collect();

    let candidates: Vec<&Task> = tasks.iter().filter(|t| !t.state.is_terminal()).collect();
    if candidates.is_empty() {
        return Err(TaskError::NoSelectableTasks(
            "all tasks are in a terminal state".to_string(),
        ));
    }

    // A task is a leaf when no other non-terminal task depends on it.
    let depended_on: HashSet<&str> = candidates
        .iter()
        .flat_map(|t| t.dependencies.iter().map(String::as_str))
        .collect();

    let mut available: Vec<&Task> = Vec::new();
    let mut blocked: Vec<BlockedCandidate> = Vec::new();

    for task in &candidates {
        match blocking_reason(task, &states, config) {
            Some(reason) => blocked.push(BlockedCandidate {
                task_id: task.id.clone(),
                title: task.title.clone(),
                reason,
            }),
            None => available.push(task),
        }
    }

    if available.is_empty() {
        let detail = blocked
            .iter()
            .map(|b| format!("{}: {}", b.task_id, b.reason))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(TaskError::NoSelectableTasks(detail));
    }

    available.sort_by(|a, b| compare_candidates(a, b, &depended_on, config));

    let winner = available[0];
    let is_leaf = !depended_on.contains(winner.id.as_str());
    let top_priority_ties = available
        .iter()
        .filter(|t| t.priority == winner.priority)
        .count();

    let reason = build_reason(
        winner,
        is_leaf,
        candidates.len(),
        available.len(),
        top_priority_ties,
        config,
    );

    Ok(Selection {
        task: winner.clone(),
        reason,
        candidates: candidates.len(),
        available: available.len(),
        blocked,
    })
}

/// Why a candidate cannot run now, or None when it is available.
fn blocking_reason(
    task: &Task,
    states: &HashMap<&str, TaskState>,
    config: &SelectorConfig,
) -> Option<String> {
    for dependency in &task.dependencies {
        match states.get(dependency.as_str()) {
            None => return Some(format!("dependency {dependency} does not resolve")),
            Some(state) if config.dependency_strict && *state != TaskState::Done => {
                return Some(format!("dependency {dependency} not complete ({state})"))
            }
            Some(_) => {}
        }
    }
    None
}

fn compare_candidates(
    a: &Task,
    b: &Task,
    depended_on: &HashSet<&str>,
    config: &SelectorConfig,
) -> Ordering {
    // Priority descending
    let ordering = b.priority.cmp(&a.priority);
    if ordering != Ordering::Equal {
        return ordering;
    }

    // Leaf tasks first, when preferred
    if config.prefer_leaf_tasks {
        let a_leaf = !depended_on.contains(a.id.as_str());
        let b_leaf = !depended_on.contains(b.id.as_str());
        let ordering = b_leaf.cmp(&a_leaf);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    // Configured tie-breaker
    let ordering = match config.tie_breaker {
        TieBreaker::OldestUpdated => a.updated_at.cmp(&b.updated_at),
        TieBreaker::NewestCreated => b.created_at.cmp(&a.created_at),
        TieBreaker::Alphabetical => a.title.cmp(&b.title),
    };
    if ordering != Ordering::Equal {
        return ordering;
    }

    // Documented final fallback: alphabetical, then id for total order
    a.title.cmp(&b.title).then_with(|| a.id.cmp(&b.id))
}

fn build_reason(
    winner: &Task,
    is_leaf: bool,
    candidates: usize,
    available: usize,
    top_priority_ties: usize,
    config: &SelectorConfig,
) -> String {
    let mut criteria = vec![format!("priority {}", winner.priority)];

    if config.prefer_leaf_tasks && is_leaf {
        criteria.push("leaf task".to_string());
    }

    if !winner.dependencies.is_empty() {
        criteria.push(format!(
            "{} dependencies satisfied",
            winner.dependencies.len()
        ));
    }

    if top_priority_ties > 1 {
        let phrase = match config.tie_breaker {
            TieBreaker::OldestUpdated => {
                format!("oldest update {}", format_age(winner.updated_at))
            }
            TieBreaker::NewestCreated => {
                format!("newest creation {}", format_age(winner.created_at))
            }
            TieBreaker::Alphabetical => "first alphabetically".to_string(),
        };
        criteria.push(phrase);
    }

    format!(
        "selected from {candidates} candidates ({available} available): {}",
        criteria.join(", ")
    )
}

/// Coarse age for rationale strings ("3 days ago", "2 hours ago").
fn format_age(then: DateTime<Utc>) -> String {
    let elapsed = Utc::now().signed_duration_since(then);
    if elapsed.num_days() >= 1 {
        format!("{} days ago", elapsed.num_days())
    } else if elapsed.num_hours() >= 1 {
        format!("{} hours ago", elapsed.num_hours())
    } else if elapsed.num_minutes() >= 1 {
        format!("{} minutes ago", elapsed.num_minutes())
    } else {
        "moments ago".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn task(id: &str, title: &str, state: TaskState, priority: i64, deps: Vec<&str>) -> Task {
        let now = Utc::now();
        Task {
            id: id.to_string(),
            title: title.to_string(),
            description: format!("{title} description"),
            state,
            priority,
            owner: String::new(),
            tags: vec![],
            dependencies: deps.into_iter().map(String::from).collect(),
            notes: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_empty_store() {
        let err = select_next(&[], &SelectorConfig::default()).unwrap_err();
        assert_eq!(err, TaskError::NoTasks);
    }

    #[test]
    fn test_all_done() {
        let tasks = vec![task("T1", "Done", TaskState::Done, 5, vec![])];
        let err = select_next(&tasks, &SelectorConfig::default()).unwrap_err();
        assert!(matches!(err, TaskError::NoSelectableTasks(_)));
    }

    #[test]
    fn test_priority_wins() {
        let tasks = vec![
            task("T1", "Low", TaskState::ReadyForPlan, 3, vec![]),
            task("T2", "High", TaskState::ReadyForPlan, 8, vec![]),
        ];

        let selection = select_next(&tasks, &SelectorConfig::default()).unwrap();
        assert_eq!(selection.task.id, "T2");
        assert!(selection.reason.contains("priority 8"));
        assert_eq!(selection.candidates, 2);
        assert_eq!(selection.available, 2);
    }

    #[test]
    fn test_blocked_by_incomplete_dependency() {
        let tasks = vec![
            task("T1", "Blocked", TaskState::ReadyForPlan, 9, vec!["T2"]),
            task("T2", "Dep", TaskState::Planning, 5, vec![]),
        ];

        let selection = select_next(&tasks, &SelectorConfig::default()).unwrap();
        // T1 has higher priority but is blocked; T2 wins
        assert_eq!(selection.task.id, "T2");
        assert_eq!(selection.blocked.len(), 1);
        assert_eq!(selection.blocked[0].task_id, "T1");
        assert!(selection.blocked[0].reason.contains("dependency T2 not complete"));
    }

    #[test]
    fn test_all_candidates_blocked() {
        let tasks = vec![
            task("T1", "A", TaskState::ReadyForPlan, 5, vec!["T2"]),
            task("T2", "B", TaskState::Done, 5, vec![]),
            task("T3", "C", TaskState::ReadyForPlan, 5, vec!["ghost"]),
        ];
        // T1 is fine (dep done); make it blocked too by pointing at T3
        let mut tasks = tasks;
        tasks[0].dependencies = vec!["T3".to_string()];

        let err = select_next(&tasks, &SelectorConfig::default()).unwrap_err();
        match err {
            TaskError::NoSelectableTasks(detail) => {
                assert!(detail.contains("T1"));
                assert!(detail.contains("does not resolve"));
            }
            other => panic!("expected NoSelectableTasks, got {other:?}"),
        }
    }

    #[test]
    fn test_unresolved_dependency_blocks_even_when_not_strict() {
        let config = SelectorConfig {
            dependency_strict: false,
            ..Default::default()
        };
        let tasks = vec![
            task("T1", "A", TaskState::ReadyForPlan, 9, vec!["ghost"]),
            task("T2", "B", TaskState::ReadyForPlan, 1, vec![]),
        ];

        let selection = select_next(&tasks, &config).unwrap();
        assert_eq!(selection.task.id, "T2");
    }

    #[test]
    fn test_non_strict_allows_open_dependencies() {
        let config = SelectorConfig {
            dependency_strict: false,
            ..Default::default()
        };
        let tasks = vec![
            task("T1", "A", TaskState::ReadyForPlan, 9, vec!["T2"]),
            task("T2", "B", TaskState::Planning, 1, vec![]),
        ];

        let selection = select_next(&tasks, &config).unwrap();
        assert_eq!(selection.task.id, "T1");
    }

    #[test]
    fn test_leaf_preference() {
        // T1 and T2 share priority; T2 is depended on by open task T3, so T1
        // is the only leaf among the tied pair.
        let tasks = vec![
            task("T1", "Leaf", TaskState::ReadyForPlan, 5, vec![]),
            task("T2", "Trunk", TaskState::ReadyForPlan, 5, vec![]),
            task("T3", "Waiter", TaskState::ReadyForPlan, 1, vec!["T2"]),
        ];

        let selection = select_next(&tasks, &SelectorConfig::default()).unwrap();
        assert_eq!(selection.task.id, "T1");
        assert!(selection.reason.contains("leaf task"));
    }

    #[test]
    fn test_oldest_updated_tie_break() {
        let mut a = task("A", "Alpha", TaskState::ReadyForPlan, 5, vec![]);
        let mut b = task("B", "Beta", TaskState::ReadyForPlan, 5, vec![]);
        a.updated_at = Utc::now() - Duration::days(3);
        b.updated_at = Utc::now() - Duration::hours(1);

        let selection = select_next(&[b, a], &SelectorConfig::default()).unwrap();
        assert_eq!(selection.task.id, "A");
        assert!(selection.reason.contains("oldest update"));
    }

    #[test]
    fn test_newest_created_tie_break() {
        let config = SelectorConfig {
            tie_breaker: TieBreaker::NewestCreated,
            ..Default::default()
        };
        let mut a = task("A", "Alpha", TaskState::ReadyForPlan, 5, vec![]);
        let b = task("B", "Beta", TaskState::ReadyForPlan, 5, vec![]);
        a.created_at = Utc::now() - Duration::days(2);

        let selection = select_next(&[a, b], &config).unwrap();
        assert_eq!(selection.task.id, "B");
    }

    #[test]
    fn test_alphabetical_final_fallback() {
        // Equal priority, both leaves, identical timestamps: the documented
        // final fallback is alphabetical by title.
        let now = Utc::now();
        let mut a = task("Z-id", "Apply migrations", TaskState::ReadyForPlan, 5, vec![]);
        let mut b = task("A-id", "Build index", TaskState::ReadyForPlan, 5, vec![]);
        a.created_at = now;
        a.updated_at = now;
        b.created_at = now;
        b.updated_at = now;

        let selection = select_next(&[b, a], &SelectorConfig::default()).unwrap();
        assert_eq!(selection.task.title, "Apply migrations");
    }

    #[test]
    fn test_deterministic() {
        let tasks = vec![
            task("T1", "One", TaskState::ReadyForPlan, 5, vec![]),
            task("T2", "Two", TaskState::Planning, 5, vec![]),
            task("T3", "Three", TaskState::ReadyForPlan, 7, vec!["T2"]),
        ];
        let config = SelectorConfig::default();

        let first = select_next(&tasks, &config).unwrap();
        let second = select_next(&tasks, &config).unwrap();
        assert_eq!(first.task.id, second.task.id);
        assert_eq!(first.reason, second.reason);
    }

    #[test]
    fn test_config_defaults() {
        let config: SelectorConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, SelectorConfig::default());
        assert_eq!(config.algorithm, SelectionAlgorithm::PriorityDependency);
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        let result: std::result::Result<SelectorConfig, _> =
            serde_json::from_str(r#"{"algorithm": "round_robin"}"#);
        assert!(result.is_err());
    }
}
