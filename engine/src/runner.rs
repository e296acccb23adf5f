//! The LLM runner interface.
//!
//! The engine hands a runner a text prompt and the address the method
//! surface is listening on; the runner returns a final text and optionally a
//! structured result. The engine never parses the text for state decisions —
//! it relies entirely on what the agent persisted through the surface.
//!
//! `ScriptedRunner` is the in-repo implementation: it drives the real wire
//! protocol with a fixed call script, which is how the end-to-end scenarios
//! simulate an agent.

use async_trait::async_trait;
use cycle_core::error::{Result, TaskError};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// What a runner invocation produced.
#[derive(Debug, Clone, Default)]
pub struct RunnerOutcome {
    /// The agent's final text; informational only
    pub final_text: String,
    /// Optional structured result (e.g. {"status": "blocked", ...})
    pub structured: Option<Value>,
    /// External commands the runner observed the agent execute
    pub commands: Vec<String>,
}

impl RunnerOutcome {
    /// Whether the structured result declares a blocked outcome.
    pub fn is_blocked(&self) -> bool {
        self.structured
            .as_ref()
            .and_then(|v| v.get("status"))
            .and_then(Value::as_str)
            == Some("blocked")
    }
}

/// Contract between the cycle engine and the external LLM runner.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Run the agent with `prompt`; the method surface listens at
    /// `surface_addr` for the duration of the call (and through the
    /// handshake that follows).
    async fn run(&self, prompt: &str, surface_addr: &str) -> Result<RunnerOutcome>;

    /// Deliver a handshake follow-up question to the agent. Returns the
    /// agent's textual reply, or `None` when the agent is gone.
    async fn follow_up(&self, message: &str) -> Result<Option<String>>;
}

/// One scripted surface call.
#[derive(Debug, Clone)]
pub struct ScriptedCall {
    pub method: String,
    pub params: Value,
}

impl ScriptedCall {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// A batch of calls executed when a follow-up arrives, plus the textual
/// reply returned to the enforcer.
#[derive(Debug, Clone)]
struct FollowUpScript {
    calls: Vec<ScriptedCall>,
    reply: Option<String>,
}

/// Deterministic runner that plays a fixed call script against the surface.
pub struct ScriptedRunner {
    initial: Vec<ScriptedCall>,
    follow_ups: Mutex<VecDeque<FollowUpScript>>,
    last_addr: Mutex<Option<String>>,
    final_text: String,
}

impl ScriptedRunner {
    pub fn new(initial: Vec<ScriptedCall>) -> Self {
        Self {
            initial,
            follow_ups: Mutex::new(VecDeque::new()),
            last_addr: Mutex::new(None),
            final_text: "scripted run complete".to_string(),
        }
    }

    /// A runner that calls nothing — the silent-agent case.
    pub fn silent() -> Self {
        Self::new(vec![])
    }

    /// Queue a follow-up response: when the enforcer asks, execute `calls`
    /// against the still-bound surface and reply with `reply`.
    pub fn with_follow_up(self, calls: Vec<ScriptedCall>, reply: Option<&str>) -> Self {
        self.follow_ups.lock().unwrap().push_back(FollowUpScript {
            calls,
            reply: reply.map(String::from),
        });
        self
    }

    /// Set the final text reported after the initial script.
    pub fn with_final_text(mut self, text: &str) -> Self {
        self.final_text = text.to_string();
        self
    }

    /// Execute a call batch over one surface connection (initialize first),
    /// returning the raw responses.
    async fn execute(addr: &str, calls: &[ScriptedCall]) -> Result<Vec<Value>> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TaskError::Protocol(format!("connect to surface failed: {e}")))?;
        let (read_half, write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut writer = write_half;

        let mut responses = Vec::with_capacity(calls.len());
        let mut id = 0i64;

        let send = |method: String, params: Value, id: i64| {
            json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
                "id": id,
            })
        };

        let initialize = send("initialize".to_string(), Value::Null, id);
        Self::roundtrip(&mut reader, &mut writer, &initialize).await?;

        for call in calls {
            id += 1;
            let request = send(call.method.clone(), call.params.clone(), id);
            let response = Self::roundtrip(&mut reader, &mut writer, &request).await?;
            responses.push(response);
        }

        Ok(responses)
    }

    async fn roundtrip(
        reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
        writer: &mut tokio::net::tcp::OwnedWriteHalf,
        request: &Value,
    ) -> Result<Value> {
        let mut line = serde_json::to_string(request)
            .map_err(|e| TaskError::Serialization(e.to_string()))?;
        line.push('\n');

        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| TaskError::Protocol(format!("surface write failed: {e}")))?;

        let mut response_line = String::new();
        reader
            .read_line(&mut response_line)
            .await
            .map_err(|e| TaskError::Protocol(format!("surface read failed: {e}")))?;

        serde_json::from_str(&response_line).map_err(|e| TaskError::Serialization(e.to_string()))
    }
}

#[async_trait]
impl AgentRunner for ScriptedRunner {
    async fn run(&self, _prompt: &str, surface_addr: &str) -> Result<RunnerOutcome> {
        *self.last_addr.lock().unwrap() = Some(surface_addr.to_string());

        let responses = Self::execute(surface_addr, &self.initial).await?;
        let errors = responses
            .iter()
            .filter(|r| r.get("error").is_some())
            .count();

        Ok(RunnerOutcome {
            final_text: if errors > 0 {
                format!("{} ({errors} calls were refused)", self.final_text)
            } else {
                self.final_text.clone()
            },
            structured: None,
            commands: vec![],
        })
    }

    async fn follow_up(&self, _message: &str) -> Result<Option<String>> {
        let script = self.follow_ups.lock().unwrap().pop_front();
        let Some(script) = script else {
            return Ok(None);
        };

        if !script.calls.is_empty() {
            let addr = self
                .last_addr
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| TaskError::Protocol("follow-up before any run".to_string()))?;
            Self::execute(&addr, &script.calls).await?;
        }

        Ok(script.reply)
    }
}
