//! Role prompt rendering.
//!
//! Prompts are built exclusively from the rehydrated [`CycleContext`] — the
//! template data never includes anything a previous cycle computed. Each
//! role names a template; unknown names fall back to the built-in default.

use crate::context::CycleContext;
use cycle_core::{
    error::{Result, TaskError},
    roles::AgentRole,
};
use handlebars::Handlebars;
use mcp_protocol::SURFACE_METHODS;
use serde_json::json;

/// The built-in template used when a role does not register its own.
const DEFAULT_TEMPLATE: &str = r#"You are the {{role}} agent working one cycle on one task.

## Task {{task_id}} — {{title}}
Current state: {{state}}
Priority: {{priority}}

{{description}}

{{#if artifacts}}## Handover artifacts (latest versions)
{{#each artifacts}}- {{this.name}} (v{{this.version}})
{{/each}}
{{/if}}{{#if requirements}}## Linked requirements
{{#each requirements}}- {{this.key}}: {{this.title}}
{{/each}}
{{/if}}## Method surface
A JSON-RPC method surface is listening at {{surface_addr}}. Call `initialize`
first. Available methods:
{{#each methods}}- {{this}}
{{/each}}
Advance this task by exactly one state transition. Write any required
handover artifact with `artifacts.upsert`, then declare the transition with
`tasks.update_state`. Use `tasks.inspect_state` if a transition is refused.
Do not finish without declaring an outcome."#;

/// Registry of role prompt templates.
pub struct PromptLibrary {
    registry: Handlebars<'static>,
}

impl PromptLibrary {
    pub fn new() -> Self {
        let mut registry = Handlebars::new();
        registry
            .register_template_string("default", DEFAULT_TEMPLATE)
            .expect("built-in template must parse");
        Self { registry }
    }

    /// Register (or replace) a named template.
    pub fn register(&mut self, name: &str, template: &str) -> Result<()> {
        self.registry
            .register_template_string(name, template)
            .map_err(|e| TaskError::Configuration(format!("template '{name}' is invalid: {e}")))
    }

    pub fn has(&self, name: &str) -> bool {
        self.registry.get_template(name).is_some()
    }

    /// Render the prompt for one cycle from rehydrated data only.
    pub fn render(
        &self,
        role: &AgentRole,
        ctx: &CycleContext,
        surface_addr: &str,
    ) -> Result<String> {
        let template = if self.has(&role.prompt_template) {
            role.prompt_template.as_str()
        } else {
            "default"
        };

        let data = json!({
            "role": role.name,
            "task_id": ctx.task.id,
            "title": ctx.task.title,
            "description": ctx.task.description,
            "state": ctx.task.state,
            "priority": ctx.task.priority,
            "artifacts": ctx.artifacts.iter().map(|a| json!({
                "name": a.name,
                "version": a.version,
            })).collect::<Vec<_>>(),
            "requirements": ctx.requirements.iter().map(|r| json!({
                "key": r.key,
                "title": r.title,
                "text": r.text,
            })).collect::<Vec<_>>(),
            "methods": SURFACE_METHODS,
            "surface_addr": surface_addr,
        });

        self.registry
            .render(template, &data)
            .map_err(|e| TaskError::Internal(format!("prompt rendering failed: {e}")))
    }
}

impl Default for PromptLibrary {
    fn default() -> Self {
        Self::new()
    }
}
