//! Plan ingestion.
//!
//! Consumes the *output* of external plan parsing: a JSON payload with
//! `requirements` and `tasks` arrays. Records that already exist are skipped
//! so ingestion can be re-run after the plan grows.

use cycle_core::{
    error::{Result, TaskError},
    models::{NewRequirement, NewTask},
    store::Store,
};
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

/// The externally-parsed plan payload.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanPayload {
    #[serde(default)]
    pub requirements: Vec<NewRequirement>,
    #[serde(default)]
    pub tasks: Vec<PlanTask>,
}

/// One task entry in the plan, with its requirement links.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanTask {
    #[serde(flatten)]
    pub task: NewTask,
    /// Requirement keys this task satisfies
    #[serde(default)]
    pub requirements: Vec<String>,
}

/// Counts reported after ingestion.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub requirements: usize,
    pub tasks: usize,
    pub links: usize,
    pub skipped: usize,
}

/// Load the plan payload from disk.
pub fn load_plan(path: &Path) -> Result<PlanPayload> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| TaskError::Configuration(format!("cannot read plan file: {e}")))?;
    serde_json::from_str(&raw)
        .map_err(|e| TaskError::Configuration(format!("plan file is not valid JSON: {e}")))
}

/// Insert the plan's requirement and task records plus their links.
///
/// Tasks are inserted in file order, so a task may depend on any task
/// declared before it.
pub async fn ingest_plan<S: Store>(store: &S, plan: PlanPayload) -> Result<IngestSummary> {
    let mut summary = IngestSummary::default();

    for requirement in plan.requirements {
        let key = requirement.key.clone();
        match store.create_requirement(requirement).await {
            Ok(_) => summary.requirements += 1,
            Err(TaskError::Validation(msg)) if msg.contains("already exists") => {
                warn!(key = %key, "requirement already ingested, skipping");
                summary.skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    for entry in plan.tasks {
        let task_id = entry.task.id.clone();
        match store.create_task(entry.task).await {
            Ok(_) => summary.tasks += 1,
            Err(TaskError::Validation(msg)) if msg.contains("already exists") => {
                warn!(task_id = %task_id, "task already ingested, skipping");
                summary.skipped += 1;
            }
            Err(e) => return Err(e),
        }

        for key in entry.requirements {
            store.link_requirement(&task_id, &key).await?;
            summary.links += 1;
        }
    }

    info!(
        requirements = summary.requirements,
        tasks = summary.tasks,
        links = summary.links,
        skipped = summary.skipped,
        "plan ingested"
    );

    Ok(summary)
}
