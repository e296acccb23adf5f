use crate::{
    error::Result,
    models::{
        Artifact, ArtifactRef, AuditEntry, AuditReport, NewAuditEntry, NewRequirement, NewTask,
        Requirement, RequirementKind, Task, TaskFilter,
    },
    roles::AgentRole,
    states::TaskState,
    transition::TransitionInspection,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Task persistence and the transactional transition path.
///
/// Implementations must be thread-safe and support concurrent access.
/// `validate_and_transition` is the only way a task's state changes during
/// normal operation; `force_state` exists solely for the handshake's
/// recovery drop and bypasses the successor check.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Create a new task in `ready_for_plan`.
    ///
    /// # Returns
    /// * `Ok(Task)` - The created task with timestamps assigned
    /// * `Err(TaskError::Validation)` - If the task data is invalid
    /// * `Err(TaskError::DependencyUnresolved)` - If a dependency id does not resolve
    /// * `Err(TaskError::Database)` - If the database operation fails
    async fn create_task(&self, task: NewTask) -> Result<Task>;

    /// Get a task by its opaque id.
    ///
    /// # Returns
    /// * `Ok(Some(Task))` - The task if found
    /// * `Ok(None)` - If no task exists with that id
    /// * `Err(TaskError::Database)` - If the database operation fails
    async fn get_task(&self, id: &str) -> Result<Option<Task>>;

    /// List tasks matching the filter. Results are ordered by priority
    /// descending, then updated_at ascending.
    async fn list_tasks(&self, filter: TaskFilter) -> Result<Vec<Task>>;

    /// Load every task. The selector operates on this snapshot.
    async fn all_tasks(&self) -> Result<Vec<Task>>;

    /// Append a timestamped note to a task without changing its state.
    ///
    /// # Returns
    /// * `Ok(Task)` - The updated task (updated_at strictly increased)
    /// * `Err(TaskError::NotFound)` - If the task doesn't exist
    async fn append_note(&self, id: &str, note: &str) -> Result<Task>;

    /// Validate and perform a state transition atomically within one store
    /// transaction: successor check, work-state dependency gate, required
    /// handover gate, then the write.
    ///
    /// # Returns
    /// * `Ok(Task)` - The task in its new state
    /// * `Err(TaskError::NotFound)` - If the task doesn't exist
    /// * `Err(TaskError::IllegalTransition)` - With the legal successor set
    /// * `Err(TaskError::DependencyIncomplete | DependencyUnresolved)` - Work-state gate
    /// * `Err(TaskError::MissingHandover | EmptyHandover)` - Handover gate
    async fn validate_and_transition(
        &self,
        id: &str,
        new_state: TaskState,
        note: Option<&str>,
    ) -> Result<Task>;

    /// Read-only sibling of `validate_and_transition`: the same
    /// classification plus what would need to change, without mutating.
    async fn inspect_transition(&self, id: &str, new_state: TaskState)
        -> Result<TransitionInspection>;

    /// Write a state directly, bypassing the successor check. Reserved for
    /// the handshake's drop to `needs_fixes`; never exposed on the method
    /// surface.
    async fn force_state(&self, id: &str, state: TaskState, note: &str) -> Result<Task>;

    /// Verify store connectivity.
    async fn health_check(&self) -> Result<()>;
}

/// Requirement persistence. Requirements are written by plan ingestion and
/// read-only during cycles.
#[async_trait]
pub trait RequirementStore: Send + Sync {
    /// Insert a requirement. The key must be unique.
    async fn create_requirement(&self, requirement: NewRequirement) -> Result<Requirement>;

    /// Associate a requirement with a task (many-to-many). Idempotent.
    async fn link_requirement(&self, task_id: &str, requirement_key: &str) -> Result<()>;

    /// List requirements, optionally filtered by kind.
    async fn list_requirements(&self, kind: Option<RequirementKind>) -> Result<Vec<Requirement>>;

    /// Requirements linked to a task, ordered by key.
    async fn requirements_for_task(&self, task_id: &str) -> Result<Vec<Requirement>>;
}

/// Artifact persistence. Artifacts are append-only: an upsert creates the
/// next contiguous version for `(task_id, name)`.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Create the next version of an artifact.
    ///
    /// # Returns
    /// * `Ok(Artifact)` - With `version` = highest prior version + 1 (1 for the first)
    /// * `Err(TaskError::NotFound)` - If the task doesn't exist
    async fn upsert_artifact(
        &self,
        task_id: &str,
        name: &str,
        content: &str,
        meta: Option<serde_json::Value>,
    ) -> Result<Artifact>;

    /// Fetch one artifact version. `version` of `None` (or 0 at the surface)
    /// means the latest.
    async fn get_artifact(
        &self,
        task_id: &str,
        name: &str,
        version: Option<i64>,
    ) -> Result<Option<Artifact>>;

    /// All versions of all artifacts of a task, newest first.
    async fn list_artifacts(&self, task_id: &str) -> Result<Vec<ArtifactRef>>;

    /// The latest version of each artifact name of a task. This is the set a
    /// cycle rehydrates from.
    async fn latest_artifacts(&self, task_id: &str) -> Result<Vec<Artifact>>;

    /// Artifact versions created at or after `since`, used by the handshake
    /// to report what a cycle produced.
    async fn artifacts_created_since(
        &self,
        task_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<ArtifactRef>>;
}

/// Append-only audit persistence.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append one audit entry. Entries are never edited or deleted while the
    /// task exists.
    async fn record_audit(&self, entry: NewAuditEntry) -> Result<AuditEntry>;

    /// Entries for one task in ascending time order.
    async fn audit_history(&self, task_id: &str) -> Result<Vec<AuditEntry>>;

    /// The most recent `n` entries globally, newest first.
    async fn recent_audits(&self, n: u32) -> Result<Vec<AuditEntry>>;

    /// Aggregate counts by state plus the completion rate.
    async fn audit_report(&self) -> Result<AuditReport>;
}

/// Durable record of the configured agent roles.
#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Replace the persisted role table with the configured one.
    async fn sync_agents(&self, roles: &[AgentRole]) -> Result<()>;

    /// The persisted role table, in declaration order.
    async fn list_agents(&self) -> Result<Vec<AgentRole>>;
}

/// Per-task advisory locks backing the one-cycle-per-task rule.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Acquire the lock for `task_id` on behalf of `cycle_id`.
    ///
    /// # Returns
    /// * `Ok(())` - Lock acquired
    /// * `Err(TaskError::TaskBusy)` - Another cycle holds the lock
    async fn acquire_task_lock(&self, task_id: &str, cycle_id: &str) -> Result<()>;

    /// Release the lock if `cycle_id` holds it. Releasing a lock that is not
    /// held is a no-op.
    async fn release_task_lock(&self, task_id: &str, cycle_id: &str) -> Result<()>;
}

/// The full store contract the cycle engine operates over.
pub trait Store:
    TaskStore + RequirementStore + ArtifactStore + AuditStore + AgentStore + LockStore
{
}

impl<T> Store for T where
    T: TaskStore + RequirementStore + ArtifactStore + AuditStore + AgentStore + LockStore
{
}
