//! End-to-end cycle scenarios: a real SQLite store, the TCP method surface,
//! and a scripted runner standing in for the LLM agent.

use cycle_core::{
    models::{CycleOutcome, NewTask},
    roles::{AgentRole, RoleTable},
    selector::{select_next, SelectorConfig},
    states::TaskState,
    store::{AuditStore, LockStore, TaskStore},
    TaskError,
};
use cycle_engine::{
    CycleEngine, EngineConfig, HandshakeConfig, HandshakeEnforcer, ScriptedCall, ScriptedRunner,
};
use database::SqliteStore;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn role_table() -> RoleTable {
    RoleTable::new(vec![
        AgentRole {
            name: "architect".to_string(),
            handles_states: vec![TaskState::ReadyForPlan, TaskState::Planning],
            may_transition_to: vec![
                TaskState::Planning,
                TaskState::ReadyForImplementation,
                TaskState::NeedsFixes,
            ],
            can_read_plan: true,
            can_execute_commands: false,
            can_write_artifacts: true,
            prompt_template: "default".to_string(),
        },
        AgentRole {
            name: "developer".to_string(),
            handles_states: vec![
                TaskState::ReadyForImplementation,
                TaskState::Implementing,
                TaskState::NeedsFixes,
                TaskState::Fixing,
            ],
            may_transition_to: vec![
                TaskState::Implementing,
                TaskState::ReadyForCodeReview,
                TaskState::NeedsFixes,
                TaskState::Fixing,
            ],
            can_read_plan: true,
            can_execute_commands: true,
            can_write_artifacts: true,
            prompt_template: "default".to_string(),
        },
        AgentRole {
            name: "reviewer".to_string(),
            handles_states: vec![TaskState::ReadyForCodeReview, TaskState::Reviewing],
            may_transition_to: vec![
                TaskState::Reviewing,
                TaskState::ReadyForCommit,
                TaskState::NeedsFixes,
            ],
            can_read_plan: true,
            can_execute_commands: false,
            can_write_artifacts: true,
            prompt_template: "default".to_string(),
        },
        AgentRole {
            name: "committer".to_string(),
            handles_states: vec![TaskState::ReadyForCommit, TaskState::Committing],
            may_transition_to: vec![
                TaskState::Committing,
                TaskState::Done,
                TaskState::NeedsFixes,
            ],
            can_read_plan: false,
            can_execute_commands: true,
            can_write_artifacts: true,
            prompt_template: "default".to_string(),
        },
    ])
}

fn fast_handshake(max_retries: u32) -> HandshakeConfig {
    HandshakeConfig {
        max_retries,
        retry_delay_seconds: 0,
        timeout_seconds: 5,
        require_explicit_state_update: true,
        ..Default::default()
    }
}

fn engine_config(max_retries: u32) -> EngineConfig {
    EngineConfig {
        handshake: fast_handshake(max_retries),
        llm_timeout: Duration::from_secs(10),
        ..Default::default()
    }
}

fn engine(
    store: Arc<SqliteStore>,
    runner: ScriptedRunner,
    config: EngineConfig,
) -> CycleEngine<SqliteStore, ScriptedRunner> {
    CycleEngine::new(store, Arc::new(runner), role_table(), config).unwrap()
}

async fn store_with_task(id: &str, priority: i64) -> Arc<SqliteStore> {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    store
        .create_task(NewTask::new(id, format!("Task {id}"), "description").with_priority(priority))
        .await
        .unwrap();
    store
}

#[tokio::test]
async fn test_planning_cycle_advances_task() {
    let store = store_with_task("T1", 7).await;

    let runner = ScriptedRunner::new(vec![ScriptedCall::new(
        "tasks.update_state",
        json!({"task_id": "T1", "state": "planning", "note": "starting the plan"}),
    )]);

    let result = engine(store.clone(), runner, engine_config(1))
        .execute(false)
        .await
        .unwrap();

    assert_eq!(result.prev_state, TaskState::ReadyForPlan);
    assert_eq!(result.next_state, TaskState::Planning);
    assert_eq!(result.outcome, CycleOutcome::Success);
    assert!(!result.dry_run);

    let task = store.get_task("T1").await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::Planning);

    // Exactly one audit entry, recording the transition
    let history = store.audit_history("T1").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].prev_state, TaskState::ReadyForPlan);
    assert_eq!(history[0].next_state, TaskState::Planning);
    assert_eq!(history[0].actor, "architect");
    assert_eq!(history[0].result, CycleOutcome::Success);
    assert!(history[0].selection_reason.contains("priority 7"));
}

#[tokio::test]
async fn test_missing_handover_drops_to_needs_fixes() {
    let store = store_with_task("T1", 5).await;
    store
        .validate_and_transition("T1", TaskState::Planning, None)
        .await
        .unwrap();

    // The agent tries to leave planning without creating the plan artifact,
    // then answers one follow-up without fixing anything.
    let runner = ScriptedRunner::new(vec![ScriptedCall::new(
        "tasks.update_state",
        json!({"task_id": "T1", "state": "ready_for_implementation"}),
    )])
    .with_follow_up(vec![], Some("stuck: no plan was produced"));

    let result = engine(store.clone(), runner, engine_config(1))
        .execute(false)
        .await
        .unwrap();

    assert_eq!(result.outcome, CycleOutcome::Error);
    assert_eq!(result.next_state, TaskState::NeedsFixes);
    assert_eq!(result.follow_ups, 1);

    let task = store.get_task("T1").await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::NeedsFixes);

    let history = store.audit_history("T1").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].result, CycleOutcome::Error);
    assert_eq!(history[0].follow_ups.len(), 1);
    assert_eq!(
        history[0].follow_ups[0].response.as_deref(),
        Some("stuck: no plan was produced")
    );
    assert!(history[0].note.as_ref().unwrap().contains("handshake failed"));
}

#[tokio::test]
async fn test_dependency_block_selects_the_dependency() {
    let store = store_with_task("T2", 5).await;
    store
        .create_task(
            NewTask::new("T1", "Dependent", "needs T2")
                .with_priority(9)
                .with_dependencies(vec!["T2".to_string()]),
        )
        .await
        .unwrap();
    store
        .validate_and_transition("T2", TaskState::Planning, None)
        .await
        .unwrap();

    // The snapshot records T1 as blocked with the dependency reason
    let snapshot = store.all_tasks().await.unwrap();
    let selection = select_next(&snapshot, &SelectorConfig::default()).unwrap();
    assert_eq!(selection.task.id, "T2");
    assert_eq!(selection.blocked.len(), 1);
    assert_eq!(selection.blocked[0].task_id, "T1");
    assert!(selection.blocked[0]
        .reason
        .contains("dependency T2 not complete"));

    // A full cycle therefore advances T2, not T1
    let runner = ScriptedRunner::new(vec![ScriptedCall::new(
        "tasks.update_state",
        json!({"task_id": "T2", "state": "needs_fixes", "note": "planning stalled"}),
    )]);

    let result = engine(store.clone(), runner, engine_config(1))
        .execute(false)
        .await
        .unwrap();
    assert_eq!(result.task_id, "T2");
}

#[tokio::test]
async fn test_all_blocked_is_a_selection_error_without_audit() {
    // A dependency cycle blocks both candidates
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    store
        .create_task(NewTask::new("A", "First", "desc"))
        .await
        .unwrap();
    store
        .create_task(NewTask::new("B", "Second", "desc").with_dependencies(vec!["A".to_string()]))
        .await
        .unwrap();

    let mut snapshot = store.all_tasks().await.unwrap();
    snapshot[0].dependencies = vec!["B".to_string()];
    let err = select_next(&snapshot, &SelectorConfig::default()).unwrap_err();
    assert!(matches!(err, TaskError::NoSelectableTasks(_)));

    // Selection failures abort before any side effect: an empty store fails
    // with no_tasks and records nothing
    let empty_store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let err = engine(empty_store.clone(), ScriptedRunner::silent(), engine_config(1))
        .execute(false)
        .await
        .unwrap_err();
    assert_eq!(err, TaskError::NoTasks);
    assert!(empty_store.recent_audits(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_priority_tie_breaks_by_oldest_update() {
    let store = store_with_task("A", 5).await;
    store
        .create_task(NewTask::new("B", "Task B", "description").with_priority(5))
        .await
        .unwrap();
    // Touch B so A holds the oldest updated_at
    store.append_note("B", "touched").await.unwrap();

    let result = engine(store.clone(), ScriptedRunner::silent(), engine_config(1))
        .execute(true)
        .await
        .unwrap();

    assert_eq!(result.task_id, "A");
    assert!(result.selection_reason.contains("oldest update"));
}

#[tokio::test]
async fn test_artifact_cycle_reports_outputs() {
    let store = store_with_task("T1", 5).await;
    store
        .validate_and_transition("T1", TaskState::Planning, None)
        .await
        .unwrap();

    let runner = ScriptedRunner::new(vec![
        ScriptedCall::new(
            "artifacts.upsert",
            json!({"task_id": "T1", "name": "implementation_plan", "content": "# Plan\n1. build"}),
        ),
        ScriptedCall::new(
            "tasks.update_state",
            json!({"task_id": "T1", "state": "ready_for_implementation"}),
        ),
    ]);

    let result = engine(store.clone(), runner, engine_config(1))
        .execute(false)
        .await
        .unwrap();

    assert_eq!(result.outcome, CycleOutcome::Success);
    assert_eq!(result.next_state, TaskState::ReadyForImplementation);
    assert_eq!(result.artifacts_created.len(), 1);
    assert_eq!(result.artifacts_created[0].name, "implementation_plan");
    assert_eq!(result.artifacts_created[0].version, 1);

    let history = store.audit_history("T1").await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].outputs_summary.contains("implementation_plan@1"));
    assert!(history[0].inputs_summary.contains("task:T1@planning"));
}

#[tokio::test]
async fn test_dry_run_leaves_store_untouched() {
    let store = store_with_task("T1", 5).await;
    let before = store.get_task("T1").await.unwrap().unwrap();

    let result = engine(store.clone(), ScriptedRunner::silent(), engine_config(1))
        .execute(true)
        .await
        .unwrap();

    assert!(result.dry_run);
    assert_eq!(result.prev_state, TaskState::ReadyForPlan);
    assert_eq!(result.next_state, TaskState::Planning); // first legal successor
    assert_eq!(result.outcome, CycleOutcome::Success);

    let after = store.get_task("T1").await.unwrap().unwrap();
    assert_eq!(before, after);
    assert!(store.audit_history("T1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_cycle_on_same_task_fails_busy() {
    let store = store_with_task("T1", 5).await;

    // Another cycle holds the advisory lock
    store.acquire_task_lock("T1", "other-cycle").await.unwrap();

    let err = engine(store.clone(), ScriptedRunner::silent(), engine_config(1))
        .execute(false)
        .await
        .unwrap_err();
    assert_eq!(err, TaskError::TaskBusy("T1".to_string()));

    // Nothing changed and nothing was audited
    let task = store.get_task("T1").await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::ReadyForPlan);
    assert!(store.audit_history("T1").await.unwrap().is_empty());

    // Released lock unblocks the next cycle
    store.release_task_lock("T1", "other-cycle").await.unwrap();
    let runner = ScriptedRunner::new(vec![ScriptedCall::new(
        "tasks.update_state",
        json!({"task_id": "T1", "state": "planning"}),
    )]);
    let result = engine(store.clone(), runner, engine_config(1))
        .execute(false)
        .await
        .unwrap();
    assert_eq!(result.outcome, CycleOutcome::Success);
}

#[tokio::test]
async fn test_no_agent_configured_aborts() {
    let store = store_with_task("T1", 5).await;
    store
        .force_state("T1", TaskState::Committing, "test setup")
        .await
        .unwrap();

    // A table with only the architect is valid but does not cover committing
    let partial = RoleTable::new(vec![AgentRole {
        name: "architect".to_string(),
        handles_states: vec![TaskState::ReadyForPlan, TaskState::Planning],
        may_transition_to: vec![TaskState::Planning],
        can_read_plan: true,
        can_execute_commands: false,
        can_write_artifacts: true,
        prompt_template: "default".to_string(),
    }]);

    let engine = CycleEngine::new(
        store.clone(),
        Arc::new(ScriptedRunner::silent()),
        partial,
        engine_config(1),
    )
    .unwrap();

    let err = engine.execute(false).await.unwrap_err();
    assert_eq!(err, TaskError::NoAgentConfigured(TaskState::Committing));
}

#[tokio::test]
async fn test_timebox_expiry_unwinds_to_needs_fixes() {
    let store = store_with_task("T1", 5).await;

    // A zero timebox: every mutation is past the deadline
    let config = EngineConfig {
        cycle_timebox: Some(Duration::ZERO),
        ..engine_config(0)
    };

    let runner = ScriptedRunner::new(vec![ScriptedCall::new(
        "tasks.update_state",
        json!({"task_id": "T1", "state": "planning"}),
    )]);

    let result = engine(store.clone(), runner, config).execute(false).await.unwrap();

    assert_eq!(result.outcome, CycleOutcome::Error);
    assert_eq!(result.next_state, TaskState::NeedsFixes);

    let task = store.get_task("T1").await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::NeedsFixes);

    let history = store.audit_history("T1").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].result, CycleOutcome::Error);
}

#[tokio::test]
async fn test_handshake_succeeds_after_follow_up_declaration() {
    let store = store_with_task("T1", 5).await;

    // Silent at first; declares the transition only when asked
    let runner = ScriptedRunner::silent().with_follow_up(
        vec![ScriptedCall::new(
            "tasks.update_state",
            json!({"task_id": "T1", "state": "planning"}),
        )],
        Some("done now"),
    );

    let result = engine(store.clone(), runner, engine_config(2))
        .execute(false)
        .await
        .unwrap();

    assert_eq!(result.outcome, CycleOutcome::Success);
    assert_eq!(result.next_state, TaskState::Planning);
    assert_eq!(result.follow_ups, 1);

    let history = store.audit_history("T1").await.unwrap();
    assert_eq!(history[0].follow_ups.len(), 1);
    assert_eq!(history[0].follow_ups[0].state_after, TaskState::Planning);
}

#[tokio::test]
async fn test_handshake_is_idempotent() {
    let store = store_with_task("T1", 5).await;
    let window_start = chrono::Utc::now();
    store
        .validate_and_transition("T1", TaskState::Planning, None)
        .await
        .unwrap();
    let after_transition = store.get_task("T1").await.unwrap().unwrap();

    let enforcer = HandshakeEnforcer::new(fast_handshake(2));
    let runner = ScriptedRunner::silent();

    let first = enforcer
        .enforce(
            store.as_ref(),
            &runner,
            "T1",
            TaskState::ReadyForPlan,
            window_start,
        )
        .await
        .unwrap();
    assert!(first.success);
    assert!(first.follow_ups.is_empty());

    // Running it again against the already-advanced task is a no-op
    let second = enforcer
        .enforce(
            store.as_ref(),
            &runner,
            "T1",
            TaskState::ReadyForPlan,
            window_start,
        )
        .await
        .unwrap();
    assert!(second.success);
    assert!(!second.forced_recovery);

    let untouched = store.get_task("T1").await.unwrap().unwrap();
    assert_eq!(untouched, after_transition);
}

#[tokio::test]
async fn test_full_walk_to_done() {
    let store = store_with_task("T1", 5).await;

    // Each entry: the scripted agent calls for one cycle
    let cycles: Vec<Vec<ScriptedCall>> = vec![
        vec![ScriptedCall::new(
            "tasks.update_state",
            json!({"task_id": "T1", "state": "planning"}),
        )],
        vec![
            ScriptedCall::new(
                "artifacts.upsert",
                json!({"task_id": "T1", "name": "implementation_plan", "content": "# Plan"}),
            ),
            ScriptedCall::new(
                "tasks.update_state",
                json!({"task_id": "T1", "state": "ready_for_implementation"}),
            ),
        ],
        vec![ScriptedCall::new(
            "tasks.update_state",
            json!({"task_id": "T1", "state": "implementing"}),
        )],
        vec![
            ScriptedCall::new(
                "artifacts.upsert",
                json!({"task_id": "T1", "name": "change_summary", "content": "changed files"}),
            ),
            ScriptedCall::new(
                "tasks.update_state",
                json!({"task_id": "T1", "state": "ready_for_code_review"}),
            ),
        ],
        vec![ScriptedCall::new(
            "tasks.update_state",
            json!({"task_id": "T1", "state": "reviewing"}),
        )],
        vec![
            ScriptedCall::new(
                "artifacts.upsert",
                json!({"task_id": "T1", "name": "review_findings", "content": "looks good"}),
            ),
            ScriptedCall::new(
                "tasks.update_state",
                json!({"task_id": "T1", "state": "ready_for_commit"}),
            ),
        ],
        vec![ScriptedCall::new(
            "tasks.update_state",
            json!({"task_id": "T1", "state": "committing"}),
        )],
        vec![
            ScriptedCall::new(
                "artifacts.upsert",
                json!({"task_id": "T1", "name": "commit_summary", "content": "committed abc123"}),
            ),
            ScriptedCall::new(
                "tasks.update_state",
                json!({"task_id": "T1", "state": "done"}),
            ),
        ],
    ];

    for calls in cycles {
        let result = engine(store.clone(), ScriptedRunner::new(calls), engine_config(1))
            .execute(false)
            .await
            .unwrap();
        assert_eq!(result.outcome, CycleOutcome::Success, "cycle failed: {result:?}");
    }

    let task = store.get_task("T1").await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::Done);

    // Eight cycles, eight audit entries, each one a legal transition
    let history = store.audit_history("T1").await.unwrap();
    assert_eq!(history.len(), 8);
    for entry in &history {
        assert!(
            entry.prev_state.can_transition_to(entry.next_state),
            "audited transition {} -> {} must be legal",
            entry.prev_state,
            entry.next_state
        );
    }

    // And the report shows full completion
    let report = store.audit_report().await.unwrap();
    assert_eq!(report.total_cycles, 8);
    assert!((report.completion_rate - 1.0).abs() < f64::EPSILON);
}
