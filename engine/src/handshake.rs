//! Completion handshake.
//!
//! The agent is instructed to declare its outcome through
//! `tasks.update_state`; the enforcer guarantees the declaration actually
//! happened. It never transitions a task anywhere except the recovery drop
//! to `needs_fixes`, and that drop is the only write it performs.

use crate::runner::AgentRunner;
use chrono::{DateTime, Utc};
use cycle_core::{
    error::{Result, TaskError},
    models::{ArtifactRef, FollowUp},
    states::TaskState,
    store::Store,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

/// Default follow-up question, a handlebars template over `task_id` and
/// `state`.
pub const DEFAULT_FOLLOW_UP_TEMPLATE: &str = "The cycle for task {{task_id}} is ending but the \
task is still in state {{state}}. If you are finished, declare the outcome now by calling \
tasks.update_state. If you are not finished, reply with a short reason.";

/// Handshake configuration, loaded from the `completion.*` config keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct HandshakeConfig {
    /// Follow-up attempts before giving up
    pub max_retries: u32,
    /// Wait between emitting a follow-up and re-reading the task
    pub retry_delay_seconds: u64,
    /// Wall-time bound on each follow-up delivery
    pub timeout_seconds: u64,
    /// When true, exhausted retries drop the task to `needs_fixes`
    pub require_explicit_state_update: bool,
    /// Follow-up question template
    pub follow_up_template: String,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay_seconds: 5,
            timeout_seconds: 30,
            require_explicit_state_update: true,
            follow_up_template: DEFAULT_FOLLOW_UP_TEMPLATE.to_string(),
        }
    }
}

/// What the handshake established about the cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeReport {
    /// True when the agent explicitly declared a transition
    pub success: bool,
    /// Task state when the handshake finished
    pub final_state: TaskState,
    /// Artifact versions created within the cycle window
    pub artifacts_created: Vec<ArtifactRef>,
    /// Every follow-up exchange, in order
    pub follow_ups: Vec<FollowUp>,
    /// Explanation recorded when the handshake had to intervene
    pub note: Option<String>,
    /// True when the enforcer performed the drop to `needs_fixes`
    pub forced_recovery: bool,
}

/// Enforces the completion handshake after the runner returns.
pub struct HandshakeEnforcer {
    config: HandshakeConfig,
}

impl HandshakeEnforcer {
    pub fn new(config: HandshakeConfig) -> Self {
        Self { config }
    }

    /// Verify the agent declared an outcome, following up a bounded number
    /// of times; drop the task into `needs_fixes` when configured to and the
    /// agent stays silent.
    ///
    /// Idempotent: called against a task that already transitioned it
    /// reports success without writing anything.
    pub async fn enforce<S: Store, R: AgentRunner + ?Sized>(
        &self,
        store: &S,
        runner: &R,
        task_id: &str,
        initial_state: TaskState,
        window_start: DateTime<Utc>,
    ) -> Result<HandshakeReport> {
        let task = store
            .get_task(task_id)
            .await?
            .ok_or_else(|| TaskError::not_found_task(task_id))?;

        let artifacts_created = store.artifacts_created_since(task_id, window_start).await?;

        if task.state != initial_state {
            tracing::debug!(task_id, from = %initial_state, to = %task.state, "handshake: transition already declared");
            return Ok(HandshakeReport {
                success: true,
                final_state: task.state,
                artifacts_created,
                follow_ups: vec![],
                note: None,
                forced_recovery: false,
            });
        }

        let mut follow_ups: Vec<FollowUp> = Vec::new();

        for attempt in 1..=self.config.max_retries {
            let question = self.render_follow_up(task_id, initial_state)?;
            let asked_at = Utc::now();

            tracing::info!(task_id, attempt, "handshake: no state change, following up");

            let response = match tokio::time::timeout(
                Duration::from_secs(self.config.timeout_seconds.max(1)),
                runner.follow_up(&question),
            )
            .await
            {
                Ok(Ok(reply)) => reply,
                Ok(Err(e)) => {
                    tracing::warn!(task_id, error = %e, "handshake follow-up failed");
                    None
                }
                Err(_) => {
                    tracing::warn!(task_id, "handshake follow-up timed out");
                    None
                }
            };

            if self.config.retry_delay_seconds > 0 {
                tokio::time::sleep(Duration::from_secs(self.config.retry_delay_seconds)).await;
            }

            let task = store
                .get_task(task_id)
                .await?
                .ok_or_else(|| TaskError::not_found_task(task_id))?;

            follow_ups.push(FollowUp {
                question,
                response,
                state_after: task.state,
                asked_at,
            });

            if task.state != initial_state {
                let artifacts_created =
                    store.artifacts_created_since(task_id, window_start).await?;
                return Ok(HandshakeReport {
                    success: true,
                    final_state: task.state,
                    artifacts_created,
                    follow_ups,
                    note: None,
                    forced_recovery: false,
                });
            }
        }

        if self.config.require_explicit_state_update {
            let note = format!(
                "handshake failed: no explicit state update from {initial_state} after {} follow-ups; dropping to needs_fixes",
                self.config.max_retries
            );
            let task = store
                .force_state(task_id, TaskState::NeedsFixes, &note)
                .await?;
            let artifacts_created = store.artifacts_created_since(task_id, window_start).await?;

            tracing::warn!(task_id, "handshake: retries exhausted, task dropped to needs_fixes");

            return Ok(HandshakeReport {
                success: false,
                final_state: task.state,
                artifacts_created,
                follow_ups,
                note: Some(note),
                forced_recovery: true,
            });
        }

        Ok(HandshakeReport {
            success: false,
            final_state: initial_state,
            artifacts_created,
            follow_ups,
            note: Some("handshake failed: no explicit state update; task left in place".to_string()),
            forced_recovery: false,
        })
    }

    fn render_follow_up(&self, task_id: &str, state: TaskState) -> Result<String> {
        handlebars::Handlebars::new()
            .render_template(
                &self.config.follow_up_template,
                &json!({"task_id": task_id, "state": state}),
            )
            .map_err(|e| TaskError::Configuration(format!("follow-up template invalid: {e}")))
    }
}
