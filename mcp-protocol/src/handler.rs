//! Method-surface handler.
//!
//! Implements the `SurfaceHandler` trait over the store for one cycle. The
//! handler is constructed fresh per cycle with the active agent role, the
//! rehydrated plan payload and the cycle deadline; it holds no state of its
//! own beyond those, which is what makes the context reset real.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cycle_core::{
    error::{Result, TaskError},
    models::{Artifact, ArtifactRef, Requirement, Task},
    protocol::{
        AppendNoteParams, GetArtifactParams, GetTaskParams, ListArtifactsParams,
        ListRequirementsParams, ListTasksParams, SurfaceHandler, TaskWithArtifacts,
        UpdateStateParams, UpsertArtifactParams,
    },
    roles::AgentRole,
    selector::{select_next, Selection, SelectorConfig},
    states::TaskState,
    store::Store,
    transition::TransitionInspection,
};
use std::sync::Arc;

/// Per-cycle handler bridging the method surface and the store.
#[derive(Clone)]
pub struct CycleSurfaceHandler<S> {
    store: Arc<S>,
    role: AgentRole,
    plan: serde_json::Value,
    selector: SelectorConfig,
    deadline: Option<DateTime<Utc>>,
}

impl<S> CycleSurfaceHandler<S> {
    /// Create a handler for one cycle.
    pub fn new(
        store: Arc<S>,
        role: AgentRole,
        plan: serde_json::Value,
        selector: SelectorConfig,
    ) -> Self {
        Self {
            store,
            role,
            plan,
            selector,
            deadline: None,
        }
    }

    /// Set the cycle deadline. Mutating calls after it fail forbidden.
    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// The active role, e.g. for logging the actor name.
    pub fn role(&self) -> &AgentRole {
        &self.role
    }

    /// Cooperative cancellation: every mutating call checks the deadline
    /// before touching the store.
    fn check_deadline(&self) -> Result<()> {
        match self.deadline {
            Some(deadline) if Utc::now() > deadline => Err(TaskError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl<S: Store + 'static> SurfaceHandler for CycleSurfaceHandler<S> {
    async fn get_next_task(&self) -> Result<Selection> {
        let tasks = self.store.all_tasks().await?;
        select_next(&tasks, &self.selector)
    }

    async fn get_task(&self, params: GetTaskParams) -> Result<TaskWithArtifacts> {
        let task = self
            .store
            .get_task(&params.task_id)
            .await?
            .ok_or_else(|| TaskError::not_found_task(&params.task_id))?;

        let artifacts = self.store.list_artifacts(&params.task_id).await?;

        Ok(TaskWithArtifacts { task, artifacts })
    }

    async fn update_state(&self, params: UpdateStateParams) -> Result<Task> {
        self.check_deadline()?;

        let target = TaskState::parse(&params.state)?;

        if !self.role.permits_transition(target) {
            return Err(TaskError::Forbidden(format!(
                "role '{}' may not transition tasks to {target}",
                self.role.name
            )));
        }

        let task = self
            .store
            .validate_and_transition(&params.task_id, target, params.note.as_deref())
            .await?;

        tracing::info!(
            task_id = %task.id,
            state = %task.state,
            actor = %self.role.name,
            "agent declared state transition"
        );

        Ok(task)
    }

    async fn inspect_state(&self, params: UpdateStateParams) -> Result<TransitionInspection> {
        let target = TaskState::parse(&params.state)?;
        self.store.inspect_transition(&params.task_id, target).await
    }

    async fn append_note(&self, params: AppendNoteParams) -> Result<Task> {
        self.check_deadline()?;
        self.store.append_note(&params.task_id, &params.note).await
    }

    async fn list_tasks(&self, params: ListTasksParams) -> Result<Vec<Task>> {
        let filter = params.into_filter()?;
        self.store.list_tasks(filter).await
    }

    async fn upsert_artifact(&self, params: UpsertArtifactParams) -> Result<Artifact> {
        self.check_deadline()?;

        if !self.role.can_write_artifacts {
            return Err(TaskError::Forbidden(format!(
                "role '{}' may not write artifacts",
                self.role.name
            )));
        }

        self.store
            .upsert_artifact(&params.task_id, &params.name, &params.content, params.meta)
            .await
    }

    async fn get_artifact(&self, params: GetArtifactParams) -> Result<Option<Artifact>> {
        // Version 0 (the wire default) means latest
        let version = if params.version == 0 {
            None
        } else {
            Some(params.version)
        };

        self.store
            .get_artifact(&params.task_id, &params.name, version)
            .await
    }

    async fn list_artifacts(&self, params: ListArtifactsParams) -> Result<Vec<ArtifactRef>> {
        self.store.list_artifacts(&params.task_id).await
    }

    async fn list_requirements(&self, params: ListRequirementsParams) -> Result<Vec<Requirement>> {
        let kind = params.parsed_kind()?;
        self.store.list_requirements(kind).await
    }

    async fn read_plan(&self) -> Result<serde_json::Value> {
        if !self.role.can_read_plan {
            return Err(TaskError::Forbidden(format!(
                "role '{}' may not read the plan",
                self.role.name
            )));
        }

        Ok(self.plan.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cycle_core::models::NewTask;
    use cycle_core::store::TaskStore;
    use database::SqliteStore;

    fn role(can_write: bool, can_read_plan: bool) -> AgentRole {
        AgentRole {
            name: "architect".to_string(),
            handles_states: vec![TaskState::ReadyForPlan, TaskState::Planning],
            may_transition_to: vec![TaskState::Planning, TaskState::ReadyForImplementation],
            can_read_plan,
            can_execute_commands: false,
            can_write_artifacts: can_write,
            prompt_template: "default".to_string(),
        }
    }

    async fn handler_with_task(
        role: AgentRole,
    ) -> CycleSurfaceHandler<SqliteStore> {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        store
            .create_task(NewTask::new("T1", "Auth", "Add authentication"))
            .await
            .unwrap();
        CycleSurfaceHandler::new(
            store,
            role,
            serde_json::json!({"requirements": []}),
            SelectorConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_update_state_permission_gate() {
        let handler = handler_with_task(role(true, true)).await;

        // Permitted target
        let task = handler
            .update_state(UpdateStateParams {
                task_id: "T1".to_string(),
                state: "planning".to_string(),
                note: None,
            })
            .await
            .unwrap();
        assert_eq!(task.state, TaskState::Planning);

        // needs_fixes is not in may_transition_to for this role
        let err = handler
            .update_state(UpdateStateParams {
                task_id: "T1".to_string(),
                state: "needs_fixes".to_string(),
                note: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_artifact_write_gate() {
        let handler = handler_with_task(role(false, true)).await;

        let err = handler
            .upsert_artifact(UpsertArtifactParams {
                task_id: "T1".to_string(),
                name: "implementation_plan".to_string(),
                content: "# Plan".to_string(),
                meta: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_plan_read_gate() {
        let handler = handler_with_task(role(true, false)).await;
        let err = handler.read_plan().await.unwrap_err();
        assert!(matches!(err, TaskError::Forbidden(_)));

        let handler = handler_with_task(role(true, true)).await;
        let plan = handler.read_plan().await.unwrap();
        assert!(plan.get("requirements").is_some());
    }

    #[tokio::test]
    async fn test_deadline_refuses_mutation_but_not_reads() {
        let handler = handler_with_task(role(true, true))
            .await
            .with_deadline(Utc::now() - chrono::Duration::seconds(1));

        let err = handler
            .update_state(UpdateStateParams {
                task_id: "T1".to_string(),
                state: "planning".to_string(),
                note: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err, TaskError::DeadlineExceeded);

        // Reads still work so the agent can explain itself in the follow-up
        let loaded = handler
            .get_task(GetTaskParams {
                task_id: "T1".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(loaded.task.state, TaskState::ReadyForPlan);
    }

    #[tokio::test]
    async fn test_get_next_task_proxies_selector() {
        let handler = handler_with_task(role(true, true)).await;
        let selection = handler.get_next_task().await.unwrap();
        assert_eq!(selection.task.id, "T1");
        assert!(selection.reason.contains("priority"));
    }

    #[tokio::test]
    async fn test_unknown_state_error() {
        let handler = handler_with_task(role(true, true)).await;
        let err = handler
            .update_state(UpdateStateParams {
                task_id: "T1".to_string(),
                state: "limbo".to_string(),
                note: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::UnknownState(_)));
    }
}
