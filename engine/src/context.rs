//! Per-cycle context.
//!
//! A `CycleContext` is built fresh at cycle start and dropped at cycle end;
//! it is the only place cycle-scoped data lives. Everything in it comes from
//! durable storage (plus the read-through plan payload), never from a
//! previous cycle's memory.

use chrono::{DateTime, Utc};
use cycle_core::{
    error::Result,
    models::{Artifact, Requirement, Task},
    selector::Selection,
    store::Store,
};

/// The rehydrated inputs for one cycle.
#[derive(Debug, Clone)]
pub struct CycleContext {
    /// Engine-allocated opaque cycle identifier
    pub cycle_id: String,
    /// Cycle start, also the artifact-attribution window start
    pub started_at: DateTime<Utc>,
    /// The selected task as loaded from the store
    pub task: Task,
    /// Why the selector chose it
    pub selection_reason: String,
    /// Latest version of each artifact name attached to the task
    pub artifacts: Vec<Artifact>,
    /// Requirements linked to the task
    pub requirements: Vec<Requirement>,
    /// The externally-parsed plan payload, consumed opaquely
    pub plan: serde_json::Value,
}

impl CycleContext {
    /// Rehydrate the cycle inputs from the store.
    pub async fn rehydrate<S: Store>(
        store: &S,
        selection: Selection,
        plan: serde_json::Value,
        cycle_id: String,
    ) -> Result<Self> {
        let artifacts = store.latest_artifacts(&selection.task.id).await?;
        let requirements = store.requirements_for_task(&selection.task.id).await?;

        Ok(Self {
            cycle_id,
            started_at: Utc::now(),
            task: selection.task,
            selection_reason: selection.reason,
            artifacts,
            requirements,
            plan,
        })
    }

    /// Compact reference list of the inputs, recorded in the audit entry.
    pub fn inputs_summary(&self) -> String {
        let artifacts = self
            .artifacts
            .iter()
            .map(|a| format!("{}@{}", a.name, a.version))
            .collect::<Vec<_>>()
            .join(",");
        let requirements = self
            .requirements
            .iter()
            .map(|r| r.key.clone())
            .collect::<Vec<_>>()
            .join(",");

        format!(
            "plan:{}; task:{}@{}; artifacts:[{artifacts}]; requirements:[{requirements}]",
            if self.plan.is_null() { "absent" } else { "present" },
            self.task.id,
            self.task.state,
        )
    }
}
