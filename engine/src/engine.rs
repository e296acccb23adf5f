//! The cycle engine.
//!
//! `execute` composes the whole substrate into one cycle: context reset,
//! selection, role resolution, prompt, surface binding, runner invocation,
//! handshake, audit. One cycle advances exactly one task by at most one
//! transition and writes exactly one audit entry.

use crate::audit::AuditLogger;
use crate::context::CycleContext;
use crate::handshake::{HandshakeConfig, HandshakeEnforcer};
use crate::prompt::PromptLibrary;
use crate::runner::{AgentRunner, RunnerOutcome};
use cycle_core::{
    error::{Result, TaskError},
    models::{ArtifactRef, CycleOutcome, NewAuditEntry},
    roles::{AgentRole, RoleTable},
    selector::{select_next, SelectorConfig},
    states::TaskState,
    store::Store,
};
use mcp_protocol::{CycleSurfaceHandler, TcpSurfaceServer};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Engine configuration assembled from the loaded config file.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bind address for the per-cycle method surface; port 0 picks an
    /// ephemeral port
    pub surface_addr: String,
    /// Plan payload path, re-read every cycle
    pub plan_file: Option<PathBuf>,
    pub selection: SelectorConfig,
    pub handshake: HandshakeConfig,
    /// Wall-time budget for one runner invocation
    pub llm_timeout: Duration,
    /// Optional timebox for the whole cycle; expiry unwinds through the
    /// handshake failure path
    pub cycle_timebox: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            surface_addr: "127.0.0.1:0".to_string(),
            plan_file: None,
            selection: SelectorConfig::default(),
            handshake: HandshakeConfig::default(),
            llm_timeout: Duration::from_secs(300),
            cycle_timebox: None,
        }
    }
}

/// Summary returned to the caller after one cycle.
#[derive(Debug, Clone)]
pub struct CycleResult {
    pub cycle_id: String,
    pub task_id: String,
    pub task_title: String,
    pub prev_state: TaskState,
    pub next_state: TaskState,
    pub outcome: CycleOutcome,
    pub artifacts_created: Vec<ArtifactRef>,
    pub follow_ups: usize,
    pub selection_reason: String,
    pub duration: Duration,
    pub dry_run: bool,
}

/// Orchestrates cycles over a store and an LLM runner.
pub struct CycleEngine<S, R> {
    store: Arc<S>,
    runner: Arc<R>,
    roles: RoleTable,
    prompts: PromptLibrary,
    audit: AuditLogger<S>,
    config: EngineConfig,
}

impl<S: Store + 'static, R: AgentRunner + 'static> CycleEngine<S, R> {
    /// Create an engine. The role table is validated here so a bad mapping
    /// fails at startup, not mid-cycle.
    pub fn new(
        store: Arc<S>,
        runner: Arc<R>,
        roles: RoleTable,
        config: EngineConfig,
    ) -> Result<Self> {
        roles.validate()?;

        Ok(Self {
            audit: AuditLogger::new(store.clone()),
            store,
            runner,
            roles,
            prompts: PromptLibrary::new(),
            config,
        })
    }

    /// Mutable access to the prompt library for registering role templates.
    pub fn prompts_mut(&mut self) -> &mut PromptLibrary {
        &mut self.prompts
    }

    /// The audit logger, shared with status reporting.
    pub fn audit(&self) -> &AuditLogger<S> {
        &self.audit
    }

    /// Run one cycle. With `dry_run`, selection and prompt construction run
    /// but nothing is invoked or persisted; the predicted next state is the
    /// first legal successor.
    pub async fn execute(&self, dry_run: bool) -> Result<CycleResult> {
        let cycle_id = format!("cycle-{}", Uuid::new_v4());
        let started = std::time::Instant::now();

        // Context reset: everything this cycle sees is rehydrated here.
        let plan = self.read_plan()?;
        let tasks = self.store.all_tasks().await?;
        let selection = select_next(&tasks, &self.config.selection)?;

        let role = self
            .roles
            .role_for_state(selection.task.state)
            .cloned()
            .ok_or(TaskError::NoAgentConfigured(selection.task.state))?;

        let ctx = CycleContext::rehydrate(self.store.as_ref(), selection, plan, cycle_id).await?;

        tracing::info!(
            cycle_id = %ctx.cycle_id,
            task_id = %ctx.task.id,
            state = %ctx.task.state,
            role = %role.name,
            dry_run,
            "cycle starting"
        );

        if dry_run {
            // Prompt construction still runs so a dry run catches template
            // problems, but the surface is never bound.
            let _ = self.prompts.render(&role, &ctx, "unbound")?;

            let predicted = ctx
                .task
                .state
                .successors()
                .first()
                .copied()
                .ok_or_else(|| {
                    TaskError::Internal(format!(
                        "selected task {} is in a terminal state",
                        ctx.task.id
                    ))
                })?;

            return Ok(CycleResult {
                cycle_id: ctx.cycle_id.clone(),
                task_id: ctx.task.id.clone(),
                task_title: ctx.task.title.clone(),
                prev_state: ctx.task.state,
                next_state: predicted,
                outcome: CycleOutcome::Success,
                artifacts_created: vec![],
                follow_ups: 0,
                selection_reason: ctx.selection_reason.clone(),
                duration: started.elapsed(),
                dry_run: true,
            });
        }

        // One cycle per task: the advisory lock row is held for the whole
        // locked section and released on every path.
        self.store
            .acquire_task_lock(&ctx.task.id, &ctx.cycle_id)
            .await?;

        let result = self.run_locked(&ctx, &role, started).await;

        if let Err(e) = self
            .store
            .release_task_lock(&ctx.task.id, &ctx.cycle_id)
            .await
        {
            tracing::warn!(task_id = %ctx.task.id, error = %e, "failed to release task lock");
        }

        result
    }

    async fn run_locked(
        &self,
        ctx: &CycleContext,
        role: &AgentRole,
        started: std::time::Instant,
    ) -> Result<CycleResult> {
        let initial_state = ctx.task.state;

        let deadline = self.config.cycle_timebox.map(|timebox| {
            ctx.started_at + chrono::Duration::milliseconds(timebox.as_millis() as i64)
        });

        let mut handler = CycleSurfaceHandler::new(
            self.store.clone(),
            role.clone(),
            ctx.plan.clone(),
            self.config.selection.clone(),
        );
        if let Some(deadline) = deadline {
            handler = handler.with_deadline(deadline);
        }

        let surface = TcpSurfaceServer::bind(&self.config.surface_addr, Arc::new(handler))
            .await
            .map_err(|e| TaskError::Protocol(format!("failed to bind method surface: {e}")))?;
        let surface_addr = surface.local_addr().to_string();

        let prompt = self.prompts.render(role, ctx, &surface_addr)?;

        let outcome = match tokio::time::timeout(
            self.runner_budget(deadline),
            self.runner.run(&prompt, &surface_addr),
        )
        .await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                tracing::warn!(cycle_id = %ctx.cycle_id, error = %e, "runner failed");
                RunnerOutcome {
                    final_text: format!("runner failed: {e}"),
                    ..Default::default()
                }
            }
            Err(_) => {
                tracing::warn!(cycle_id = %ctx.cycle_id, "runner timed out");
                RunnerOutcome {
                    final_text: "runner timed out".to_string(),
                    ..Default::default()
                }
            }
        };

        // The surface stays bound through the handshake: a follow-up answer
        // arrives via tasks.update_state.
        let enforcer = HandshakeEnforcer::new(self.config.handshake.clone());
        let report = enforcer
            .enforce(
                self.store.as_ref(),
                self.runner.as_ref(),
                &ctx.task.id,
                initial_state,
                ctx.started_at,
            )
            .await;

        surface.shutdown();
        let report = report?;

        let result_kind = if report.forced_recovery {
            CycleOutcome::Error
        } else if outcome.is_blocked() {
            CycleOutcome::Blocked
        } else if report.success {
            CycleOutcome::Success
        } else {
            CycleOutcome::Error
        };

        let outputs_summary = report
            .artifacts_created
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");

        let note = report.note.clone().or_else(|| {
            let text = outcome.final_text.trim();
            if text.is_empty() {
                None
            } else {
                Some(truncate(text, 500))
            }
        });

        self.audit
            .record(NewAuditEntry {
                cycle_id: ctx.cycle_id.clone(),
                task_id: ctx.task.id.clone(),
                prev_state: initial_state,
                next_state: report.final_state,
                actor: role.name.clone(),
                selection_reason: ctx.selection_reason.clone(),
                inputs_summary: ctx.inputs_summary(),
                outputs_summary,
                commands: outcome.commands,
                result: result_kind,
                note,
                follow_ups: report.follow_ups.clone(),
            })
            .await?;

        Ok(CycleResult {
            cycle_id: ctx.cycle_id.clone(),
            task_id: ctx.task.id.clone(),
            task_title: ctx.task.title.clone(),
            prev_state: initial_state,
            next_state: report.final_state,
            outcome: result_kind,
            artifacts_created: report.artifacts_created,
            follow_ups: report.follow_ups.len(),
            selection_reason: ctx.selection_reason.clone(),
            duration: started.elapsed(),
            dry_run: false,
        })
    }

    /// Wall-time budget for the runner: the LLM timeout, clipped to the
    /// remaining timebox.
    fn runner_budget(&self, deadline: Option<chrono::DateTime<chrono::Utc>>) -> Duration {
        let mut budget = self.config.llm_timeout;

        if let Some(deadline) = deadline {
            let remaining = deadline - chrono::Utc::now();
            let remaining = remaining.to_std().unwrap_or(Duration::ZERO);
            budget = budget.min(remaining);
        }

        budget
    }

    /// Read-through plan load; a missing or unconfigured plan file is an
    /// absent payload, not an error.
    fn read_plan(&self) -> Result<serde_json::Value> {
        let Some(path) = &self.config.plan_file else {
            return Ok(serde_json::Value::Null);
        };

        if !path.exists() {
            return Ok(serde_json::Value::Null);
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|e| TaskError::Configuration(format!("cannot read plan file: {e}")))?;
        serde_json::from_str(&raw)
            .map_err(|e| TaskError::Configuration(format!("plan file is not valid JSON: {e}")))
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &text[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        let truncated = truncate("héllo wörld", 6);
        assert!(truncated.ends_with('…'));
        assert!(truncated.len() <= 6 + '…'.len_utf8());
    }

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.surface_addr, "127.0.0.1:0");
        assert!(config.cycle_timebox.is_none());
        assert_eq!(config.llm_timeout, Duration::from_secs(300));
    }
}
