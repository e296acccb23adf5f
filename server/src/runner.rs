//! Generic subprocess runner.
//!
//! Invokes the configured LLM command with the rendered prompt on stdin and
//! the method-surface address in the environment, bounded by the configured
//! timeout. Tool-specific adapters stay outside this repository; anything
//! that reads a prompt and can speak line-delimited JSON-RPC to the surface
//! address works.

use crate::config::Config;
use anyhow::Result;
use async_trait::async_trait;
use cycle_engine::{AgentRunner, RunnerOutcome};
use cycle_core::error::TaskError;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Environment variable carrying the surface address to the agent process.
pub const SURFACE_ADDR_ENV: &str = "RELAY_SURFACE_ADDR";

/// Environment variable marking a follow-up invocation.
pub const FOLLOW_UP_ENV: &str = "RELAY_FOLLOW_UP";

/// Spawns the configured agent command once per cycle (and once per
/// handshake follow-up).
pub struct ProcessRunner {
    command: String,
    workspace: Option<PathBuf>,
    timeout: Duration,
    spawn_retries: u32,
    redact_in_logs: bool,
}

impl ProcessRunner {
    /// Build a runner from the loaded configuration, enforcing the
    /// allowed-commands gate.
    pub fn from_config(config: &Config) -> Result<Self> {
        let command = config.llm.primary.clone();

        let allowed = &config.security.allowed_commands;
        if !allowed.is_empty() && !allowed.iter().any(|c| c == &command) {
            anyhow::bail!(
                "llm.primary '{command}' is not in security.allowed_commands"
            );
        }

        Ok(Self {
            command,
            workspace: config
                .security
                .workspace_restriction
                .then(|| config.workspace.clone()),
            timeout: Duration::from_secs(config.llm.timeout_seconds.max(1)),
            spawn_retries: config.llm.max_retries,
            redact_in_logs: config.security.redact_in_logs,
        })
    }

    async fn invoke(
        &self,
        input: &str,
        surface_addr: Option<&str>,
        follow_up: bool,
    ) -> cycle_core::Result<String> {
        let mut attempt = 0u32;
        loop {
            match self.invoke_once(input, surface_addr, follow_up).await {
                Ok(stdout) => return Ok(stdout),
                Err(e) if attempt < self.spawn_retries => {
                    attempt += 1;
                    warn!(error = %e, attempt, "agent invocation failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn invoke_once(
        &self,
        input: &str,
        surface_addr: Option<&str>,
        follow_up: bool,
    ) -> cycle_core::Result<String> {
        let mut command = tokio::process::Command::new(&self.command);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(addr) = surface_addr {
            command.env(SURFACE_ADDR_ENV, addr);
        }
        if follow_up {
            command.env(FOLLOW_UP_ENV, "1");
        }
        if let Some(workspace) = &self.workspace {
            command.current_dir(workspace);
        }

        let mut child = command
            .spawn()
            .map_err(|e| TaskError::Protocol(format!("failed to spawn '{}': {e}", self.command)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(|e| TaskError::Protocol(format!("failed to write prompt: {e}")))?;
            // Close stdin so the agent sees EOF
            drop(stdin);
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| TaskError::Protocol(format!("'{}' timed out", self.command)))?
            .map_err(|e| TaskError::Protocol(format!("'{}' failed: {e}", self.command)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                command = %self.command,
                code = output.status.code().unwrap_or(-1),
                "agent command exited non-zero"
            );
            debug!(stderr = %stderr, "agent stderr");
        }

        if self.redact_in_logs {
            debug!(command = %self.command, bytes = stdout.len(), "agent output captured");
        } else {
            debug!(command = %self.command, output = %stdout, "agent output captured");
        }

        Ok(stdout)
    }
}

#[async_trait]
impl AgentRunner for ProcessRunner {
    async fn run(&self, prompt: &str, surface_addr: &str) -> cycle_core::Result<RunnerOutcome> {
        let stdout = self.invoke(prompt, Some(surface_addr), false).await?;

        // A trailing JSON object line, if present, is the structured result
        let structured = stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .and_then(|l| serde_json::from_str(l.trim()).ok());

        Ok(RunnerOutcome {
            final_text: stdout,
            structured,
            commands: vec![self.command.clone()],
        })
    }

    async fn follow_up(&self, message: &str) -> cycle_core::Result<Option<String>> {
        match self.invoke(message, None, true).await {
            Ok(reply) => {
                let reply = reply.trim().to_string();
                Ok((!reply.is_empty()).then_some(reply))
            }
            Err(e) => {
                warn!(error = %e, "follow-up invocation failed");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_command(command: &str, allowed: Vec<&str>) -> Config {
        let mut config = Config::default();
        config.llm.primary = command.to_string();
        config.security.allowed_commands = allowed.into_iter().map(String::from).collect();
        config
    }

    #[test]
    fn test_allowed_commands_gate() {
        let config = config_with_command("cat", vec!["claude", "cat"]);
        assert!(ProcessRunner::from_config(&config).is_ok());

        let config = config_with_command("curl", vec!["claude"]);
        assert!(ProcessRunner::from_config(&config).is_err());

        // An empty allowlist only permits the configured primary
        let config = config_with_command("anything", vec![]);
        assert!(ProcessRunner::from_config(&config).is_ok());
    }

    #[tokio::test]
    async fn test_run_captures_stdout() {
        // `cat` echoes the prompt back, standing in for an agent
        let mut config = config_with_command("cat", vec![]);
        config.security.workspace_restriction = false;
        let runner = ProcessRunner::from_config(&config).unwrap();

        let outcome = runner.run("hello agent", "127.0.0.1:9").await.unwrap();
        assert_eq!(outcome.final_text, "hello agent");
        assert_eq!(outcome.commands, vec!["cat".to_string()]);
    }

    #[tokio::test]
    async fn test_follow_up_returns_reply() {
        let mut config = config_with_command("cat", vec![]);
        config.security.workspace_restriction = false;
        let runner = ProcessRunner::from_config(&config).unwrap();

        let reply = runner.follow_up("are you finished?").await.unwrap();
        assert_eq!(reply.as_deref(), Some("are you finished?"));
    }

    #[tokio::test]
    async fn test_missing_command_is_an_error() {
        let mut config = config_with_command("relay-no-such-binary", vec![]);
        config.security.workspace_restriction = false;
        let runner = ProcessRunner::from_config(&config).unwrap();

        assert!(runner.run("prompt", "127.0.0.1:9").await.is_err());
        // Follow-ups degrade to "agent gone" instead of failing the handshake
        assert_eq!(runner.follow_up("ping").await.unwrap(), None);
    }
}
