//! Agent roles as capability sets.
//!
//! A role is a plain record of capabilities plus a prompt-template name, not
//! a type hierarchy. The cycle engine consults the table to pick the role
//! for a task's state; the method surface consults the same record on every
//! mutating call.

use crate::error::{Result, TaskError};
use crate::states::TaskState;
use serde::{Deserialize, Serialize};

/// One configured agent role (e.g. architect, developer, reviewer).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AgentRole {
    /// Role identifier; recorded as the `actor` in audit entries
    pub name: String,
    /// Task states this role is permitted to handle
    pub handles_states: Vec<TaskState>,
    /// Successor states this role may transition a task into
    pub may_transition_to: Vec<TaskState>,
    /// May call `plan.read`
    #[serde(default)]
    pub can_read_plan: bool,
    /// May run external commands during its cycle
    #[serde(default)]
    pub can_execute_commands: bool,
    /// May create artifact versions
    #[serde(default)]
    pub can_write_artifacts: bool,
    /// Prompt template name rendered for this role's cycles
    #[serde(default = "default_prompt_template")]
    pub prompt_template: String,
}

fn default_prompt_template() -> String {
    "default".to_string()
}

impl AgentRole {
    /// Whether this role handles tasks in `state`.
    pub fn handles(&self, state: TaskState) -> bool {
        self.handles_states.contains(&state)
    }

    /// Whether this role may move a task into `target`.
    pub fn permits_transition(&self, target: TaskState) -> bool {
        self.may_transition_to.contains(&target)
    }
}

/// The configured role table, consulted once per cycle (engine) and once per
/// mutating call (method surface).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RoleTable {
    roles: Vec<AgentRole>,
}

impl RoleTable {
    pub fn new(roles: Vec<AgentRole>) -> Self {
        Self { roles }
    }

    pub fn roles(&self) -> &[AgentRole] {
        &self.roles
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// Look up a role by name.
    pub fn get(&self, name: &str) -> Option<&AgentRole> {
        self.roles.iter().find(|r| r.name == name)
    }

    /// The first role whose `handles_states` contains `state`. Declaration
    /// order is precedence order.
    pub fn role_for_state(&self, state: TaskState) -> Option<&AgentRole> {
        self.roles.iter().find(|r| r.handles(state))
    }

    /// Validate the table at startup.
    ///
    /// Rejects roles with no handled states, duplicate role names, and
    /// unreachable transition grants (a `may_transition_to` entry that is not
    /// a successor of any handled state would never be exercisable).
    pub fn validate(&self) -> Result<()> {
        for (index, role) in self.roles.iter().enumerate() {
            if role.name.trim().is_empty() {
                return Err(TaskError::Configuration(format!(
                    "agent role #{index} has an empty name"
                )));
            }
            if role.handles_states.is_empty() {
                return Err(TaskError::Configuration(format!(
                    "agent role '{}' handles no states",
                    role.name
                )));
            }
            if self.roles.iter().filter(|r| r.name == role.name).count() > 1 {
                return Err(TaskError::Configuration(format!(
                    "duplicate agent role name '{}'",
                    role.name
                )));
            }

            for target in &role.may_transition_to {
                let reachable = role
                    .handles_states
                    .iter()
                    .any(|s| s.can_transition_to(*target));
                if !reachable {
                    return Err(TaskError::Configuration(format!(
                        "agent role '{}' may transition to {target}, which is not a successor of any state it handles",
                        role.name
                    )));
                }
            }
        }

        Ok(())
    }
}
