use crate::{
    error::Result,
    models::{Artifact, ArtifactRef, Requirement, RequirementKind, Task, TaskFilter},
    selector::Selection,
    states::TaskState,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Handler trait for the method surface.
///
/// One method per surface operation; the transport layer parses the JSON-RPC
/// envelope, dispatches by method name and serializes the result. The
/// handler enforces role permissions and the cycle deadline — the transport
/// knows nothing about either.
#[async_trait]
pub trait SurfaceHandler: Send + Sync {
    /// `tasks.get_next` — run the selector and return the chosen task plus
    /// the selection rationale.
    async fn get_next_task(&self) -> Result<Selection>;

    /// `tasks.get` — one task with its artifact list embedded.
    async fn get_task(&self, params: GetTaskParams) -> Result<TaskWithArtifacts>;

    /// `tasks.update_state` — validated state transition.
    async fn update_state(&self, params: UpdateStateParams) -> Result<Task>;

    /// `tasks.inspect_state` — read-only transition classification.
    async fn inspect_state(
        &self,
        params: UpdateStateParams,
    ) -> Result<crate::transition::TransitionInspection>;

    /// `tasks.append_note` — write a note without changing state.
    async fn append_note(&self, params: AppendNoteParams) -> Result<Task>;

    /// `tasks.list` — filtered task listing.
    async fn list_tasks(&self, params: ListTasksParams) -> Result<Vec<Task>>;

    /// `artifacts.upsert` — create the next artifact version.
    async fn upsert_artifact(&self, params: UpsertArtifactParams) -> Result<Artifact>;

    /// `artifacts.get` — one artifact version; 0 or absent means latest.
    async fn get_artifact(&self, params: GetArtifactParams) -> Result<Option<Artifact>>;

    /// `artifacts.list` — all versions of all artifacts of a task.
    async fn list_artifacts(&self, params: ListArtifactsParams) -> Result<Vec<ArtifactRef>>;

    /// `requirements.list` — requirements, optionally filtered by kind.
    async fn list_requirements(&self, params: ListRequirementsParams) -> Result<Vec<Requirement>>;

    /// `plan.read` — the externally-parsed plan payload, opaque to the core.
    async fn read_plan(&self) -> Result<serde_json::Value>;
}

/// A task with its artifact references embedded, as returned by `tasks.get`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskWithArtifacts {
    pub task: Task,
    pub artifacts: Vec<ArtifactRef>,
}

/// Parameters for `tasks.get`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTaskParams {
    pub task_id: String,
}

/// Parameters for `tasks.update_state` and `tasks.inspect_state`.
///
/// The state arrives as a raw string so normalization (and the unknown-state
/// error listing canonical names) happens in one place, the handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStateParams {
    pub task_id: String,
    pub state: String,
    #[serde(default)]
    pub note: Option<String>,
}

/// Parameters for `tasks.append_note`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendNoteParams {
    pub task_id: String,
    pub note: String,
}

/// Parameters for `tasks.list`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListTasksParams {
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub min_priority: Option<i64>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
}

impl ListTasksParams {
    /// Convert surface parameters into the internal filter, normalizing the
    /// state name.
    pub fn into_filter(self) -> Result<TaskFilter> {
        let state = match self.state {
            Some(raw) => Some(TaskState::parse(&raw)?),
            None => None,
        };

        Ok(TaskFilter {
            state,
            owner: self.owner,
            min_priority: self.min_priority,
            limit: self.limit,
            offset: self.offset,
        })
    }
}

/// Parameters for `artifacts.upsert`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertArtifactParams {
    pub task_id: String,
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub meta: Option<serde_json::Value>,
}

/// Parameters for `artifacts.get`. A `version` of 0 (the default) means the
/// latest version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetArtifactParams {
    pub task_id: String,
    pub name: String,
    #[serde(default)]
    pub version: i64,
}

/// Parameters for `artifacts.list`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListArtifactsParams {
    pub task_id: String,
}

/// Parameters for `requirements.list`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListRequirementsParams {
    #[serde(default, alias = "type")]
    pub kind: Option<String>,
}

impl ListRequirementsParams {
    pub fn parsed_kind(&self) -> Result<Option<RequirementKind>> {
        match &self.kind {
            Some(raw) => Ok(Some(raw.parse()?)),
            None => Ok(None),
        }
    }
}
