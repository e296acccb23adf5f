use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use cycle_core::{
    roles::{AgentRole, RoleTable},
    selector::SelectorConfig,
    states::TaskState,
};
use cycle_engine::{EngineConfig, HandshakeConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
///
/// Layered from the embedded defaults, an optional TOML file and
/// `RELAY__`-prefixed environment variables (`__` separates nesting levels,
/// e.g. `RELAY__LLM__PRIMARY`). Unknown keys are rejected at load time.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Path of the externally-parsed plan payload; optional
    #[serde(default)]
    pub plan_file: Option<PathBuf>,
    /// Project workspace directory
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,
    /// Database path; defaults to `<workspace>/.relay/relay.sqlite`
    #[serde(default)]
    pub database: Option<PathBuf>,
    /// Port the per-cycle method surface binds; 0 picks an ephemeral port
    #[serde(default)]
    pub method_surface_port: u16,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub selection: SelectorConfig,
    #[serde(default)]
    pub completion: HandshakeConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub development: DevelopmentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Agent roles keyed by role name; consulted in name order
    #[serde(default)]
    pub agents: BTreeMap<String, AgentRoleEntry>,
}

fn default_workspace() -> PathBuf {
    PathBuf::from(".")
}

/// External LLM runner settings
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields, default)]
pub struct LlmConfig {
    /// Command invoked as the agent runner
    pub primary: String,
    /// Wall-time budget for one runner invocation
    pub timeout_seconds: u64,
    /// Runner restarts the driver may attempt on spawn failure
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            primary: "claude".to_string(),
            timeout_seconds: 300,
            max_retries: 1,
        }
    }
}

/// Runner sandboxing settings
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields, default)]
pub struct SecurityConfig {
    /// Commands the runner may invoke; empty allows the configured
    /// `llm.primary` only
    pub allowed_commands: Vec<String>,
    /// Restrict the runner's working directory to the workspace
    pub workspace_restriction: bool,
    /// Redact runner output in log lines
    pub redact_in_logs: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_commands: vec![],
            workspace_restriction: true,
            redact_in_logs: true,
        }
    }
}

/// Development toggles
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(deny_unknown_fields, default)]
pub struct DevelopmentConfig {
    /// Timebox for a whole cycle; expiry drops the task to needs_fixes
    pub cycle_timebox_seconds: Option<u64>,
}

/// Logging settings
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (pretty, json, compact)
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

/// One configured agent role; the map key supplies the name.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct AgentRoleEntry {
    pub handles_states: Vec<TaskState>,
    pub may_transition_to: Vec<TaskState>,
    #[serde(default)]
    pub can_read_plan: bool,
    #[serde(default)]
    pub can_execute_commands: bool,
    #[serde(default)]
    pub can_write_artifacts: bool,
    #[serde(default = "default_prompt_template")]
    pub prompt_template: String,
}

fn default_prompt_template() -> String {
    "default".to_string()
}

impl Config {
    /// Load configuration from the embedded defaults plus environment
    /// variables.
    pub fn from_env() -> Result<Self> {
        let builder = ConfigBuilder::builder()
            .add_source(File::from_str(
                include_str!("../config/default.toml"),
                FileFormat::Toml,
            ))
            .add_source(
                Environment::with_prefix("RELAY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Load configuration from a specific file path, layered over the
    /// embedded defaults and under environment overrides.
    pub fn from_file(path: &str) -> Result<Self> {
        let builder = ConfigBuilder::builder()
            .add_source(File::from_str(
                include_str!("../config/default.toml"),
                FileFormat::Toml,
            ))
            .add_source(File::with_name(path).format(FileFormat::Toml))
            .add_source(
                Environment::with_prefix("RELAY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder
            .build()
            .context("Failed to build configuration from file")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration from file")
    }

    /// Resolved database path.
    pub fn database_path(&self) -> PathBuf {
        match &self.database {
            Some(path) => path.clone(),
            None => self.workspace.join(".relay").join("relay.sqlite"),
        }
    }

    /// Database URL for the store.
    pub fn database_url(&self) -> String {
        format!("sqlite://{}", self.database_path().display())
    }

    /// The configured role table, in name order.
    pub fn role_table(&self) -> RoleTable {
        let roles = self
            .agents
            .iter()
            .map(|(name, entry)| AgentRole {
                name: name.clone(),
                handles_states: entry.handles_states.clone(),
                may_transition_to: entry.may_transition_to.clone(),
                can_read_plan: entry.can_read_plan,
                can_execute_commands: entry.can_execute_commands,
                can_write_artifacts: entry.can_write_artifacts,
                prompt_template: entry.prompt_template.clone(),
            })
            .collect();

        RoleTable::new(roles)
    }

    /// Assemble the engine configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            surface_addr: format!("127.0.0.1:{}", self.method_surface_port),
            plan_file: self.plan_file.clone(),
            selection: self.selection.clone(),
            handshake: self.completion.clone(),
            llm_timeout: Duration::from_secs(self.llm.timeout_seconds.max(1)),
            cycle_timebox: self
                .development
                .cycle_timebox_seconds
                .map(Duration::from_secs),
        }
    }

    /// Validate the configuration before startup.
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                anyhow::bail!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                );
            }
        }

        if self.llm.primary.trim().is_empty() {
            anyhow::bail!("llm.primary cannot be empty");
        }

        if self.llm.timeout_seconds == 0 {
            anyhow::bail!("llm.timeout_seconds must be greater than 0");
        }

        if !self.agents.is_empty() {
            self.role_table()
                .validate()
                .map_err(|e| anyhow::anyhow!("{e}"))?;
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            plan_file: None,
            workspace: default_workspace(),
            database: None,
            method_surface_port: 0,
            llm: LlmConfig::default(),
            selection: SelectorConfig::default(),
            completion: HandshakeConfig::default(),
            security: SecurityConfig::default(),
            development: DevelopmentConfig::default(),
            logging: LoggingConfig::default(),
            agents: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.llm.primary, "claude");
        assert_eq!(config.method_surface_port, 0);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_embedded_defaults_parse() {
        let config: Config = toml::from_str(include_str!("../config/default.toml")).unwrap();
        assert_eq!(config.completion.max_retries, 2);
        assert!(config.selection.dependency_strict);
        assert!(config.agents.is_empty());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let result: std::result::Result<Config, _> =
            toml::from_str("plan_fiel = \"plan.json\"\n");
        assert!(result.is_err());

        let result: std::result::Result<Config, _> =
            toml::from_str("[selection]\nalgorithm = \"priority_dependency\"\nshuffle = true\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_database_defaults_under_workspace() {
        let mut config = Config::default();
        config.workspace = PathBuf::from("/srv/project");
        assert_eq!(
            config.database_path(),
            PathBuf::from("/srv/project/.relay/relay.sqlite")
        );
        assert!(config.database_url().starts_with("sqlite:///srv/project"));
    }

    #[test]
    fn test_role_table_from_agents_map() {
        let toml = r#"
            [agents.architect]
            handles_states = ["ready_for_plan", "planning"]
            may_transition_to = ["planning", "ready_for_implementation"]
            can_read_plan = true
            can_write_artifacts = true

            [agents.developer]
            handles_states = ["implementing"]
            may_transition_to = ["ready_for_code_review", "needs_fixes"]
            can_execute_commands = true
            can_write_artifacts = true
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        let table = config.role_table();
        assert_eq!(table.roles().len(), 2);
        assert_eq!(
            table.role_for_state(TaskState::Planning).unwrap().name,
            "architect"
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_role_mapping_fails_validation() {
        let toml = r#"
            [agents.architect]
            handles_states = ["ready_for_plan"]
            may_transition_to = ["done"]
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_engine_config_conversion() {
        let mut config = Config::default();
        config.method_surface_port = 4000;
        config.development.cycle_timebox_seconds = Some(900);

        let engine = config.engine_config();
        assert_eq!(engine.surface_addr, "127.0.0.1:4000");
        assert_eq!(engine.cycle_timebox, Some(Duration::from_secs(900)));
        assert_eq!(engine.llm_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }
}
