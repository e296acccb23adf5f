//! Method-surface transports.
//!
//! The surface speaks line-delimited JSON-RPC 2.0 over two interchangeable
//! bindings: any `AsyncRead`/`AsyncWrite` pair (used for stdio piping to a
//! child process) and a local TCP socket (the address handed to the LLM
//! runner). Semantics are identical; the per-connection state machine only
//! tracks whether `initialize` has been called.

use crate::error::McpError;
use crate::serialization::{create_success_response, deserialize_params, serialize_result};
use cycle_core::protocol::SurfaceHandler;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Fixed protocol-version literal advertised by `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Every method the surface dispatches, advertised by `initialize` and named
/// in role prompts.
pub const SURFACE_METHODS: &[&str] = &[
    "tasks.get_next",
    "tasks.get",
    "tasks.update_state",
    "tasks.inspect_state",
    "tasks.append_note",
    "tasks.list",
    "artifacts.upsert",
    "artifacts.get",
    "artifacts.list",
    "requirements.list",
    "plan.read",
];

/// Per-connection protocol state.
#[derive(Debug, PartialEq)]
enum SurfaceState {
    /// Waiting for the initialize request; nothing else is accepted
    WaitingForInitialize,
    /// Initialized and dispatching method calls
    Ready,
}

/// One method-surface session over a byte stream.
pub struct SurfaceServer<H> {
    handler: Arc<H>,
    state: SurfaceState,
}

impl<H: SurfaceHandler + 'static> SurfaceServer<H> {
    pub fn new(handler: Arc<H>) -> Self {
        Self {
            handler,
            state: SurfaceState::WaitingForInitialize,
        }
    }

    /// Serve one session: read a request per line, write a response per
    /// line, until EOF.
    pub async fn serve_stream<R, W>(mut self, reader: R, mut writer: W) -> anyhow::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();

            match reader.read_line(&mut line).await {
                Ok(0) => {
                    debug!("surface stream closed");
                    break;
                }
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    let response = self.process_line(trimmed).await;
                    let response_json = serde_json::to_string(&response).unwrap_or_else(|_| {
                        r#"{"jsonrpc":"2.0","error":{"code":-32603,"message":"internal error"},"id":null}"#
                            .to_string()
                    });

                    writer.write_all(response_json.as_bytes()).await?;
                    writer.write_all(b"\n").await?;
                    writer.flush().await?;
                }
                Err(e) => {
                    error!("error reading from surface stream: {}", e);
                    break;
                }
            }
        }

        Ok(())
    }

    /// Serve over stdin/stdout, the piping binding.
    pub async fn serve_stdio(self) -> anyhow::Result<()> {
        info!("method surface serving on stdio");
        self.serve_stream(tokio::io::stdin(), tokio::io::stdout())
            .await
    }

    /// Process one request line into one response value.
    async fn process_line(&mut self, line: &str) -> Value {
        let message: Value = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                return McpError::Parse(e.to_string()).to_json_rpc_error(None);
            }
        };

        let id = message.get("id").cloned();

        if message.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            return McpError::InvalidRequest("missing or wrong jsonrpc version".to_string())
                .to_json_rpc_error(id);
        }

        let Some(method) = message.get("method").and_then(Value::as_str) else {
            return McpError::InvalidRequest("missing 'method' field".to_string())
                .to_json_rpc_error(id);
        };

        if id.is_none() {
            return McpError::InvalidRequest("requests must carry an id".to_string())
                .to_json_rpc_error(None);
        }

        let params = message.get("params").cloned().unwrap_or(Value::Null);

        debug!(method = %method, "surface request");

        let result = match (&self.state, method) {
            (SurfaceState::WaitingForInitialize, "initialize") => {
                self.state = SurfaceState::Ready;
                info!("method surface initialized");
                Ok(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": { "methods": SURFACE_METHODS },
                    "serverInfo": {
                        "name": "relay-method-surface",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }))
            }
            (SurfaceState::WaitingForInitialize, other) => Err(McpError::InvalidRequest(format!(
                "'{other}' before initialize; initialize must be the first call"
            ))),
            (SurfaceState::Ready, "initialize") => Err(McpError::InvalidRequest(
                "initialize may only be called once".to_string(),
            )),
            (SurfaceState::Ready, method) => self.dispatch(method, params).await,
        };

        match result {
            Ok(result) => create_success_response(id, result),
            Err(e) => e.to_json_rpc_error(id),
        }
    }

    /// Dispatch an initialized request to the handler.
    async fn dispatch(&self, method: &str, params: Value) -> Result<Value, McpError> {
        match method {
            "tasks.get_next" => {
                let selection = self.handler.get_next_task().await?;
                Ok(json!({
                    "task": selection.task,
                    "selection_reason": selection.reason,
                    "candidates": selection.candidates,
                    "available": selection.available,
                    "blocked": selection.blocked,
                }))
            }
            "tasks.get" => {
                let result = self.handler.get_task(deserialize_params(params)?).await?;
                serialize_result(&result)
            }
            "tasks.update_state" => {
                let task = self
                    .handler
                    .update_state(deserialize_params(params)?)
                    .await?;
                serialize_result(&task)
            }
            "tasks.inspect_state" => {
                let inspection = self
                    .handler
                    .inspect_state(deserialize_params(params)?)
                    .await?;
                serialize_result(&inspection)
            }
            "tasks.append_note" => {
                let task = self
                    .handler
                    .append_note(deserialize_params(params)?)
                    .await?;
                serialize_result(&task)
            }
            "tasks.list" => {
                let tasks = self.handler.list_tasks(deserialize_params(params)?).await?;
                serialize_result(&tasks)
            }
            "artifacts.upsert" => {
                let artifact = self
                    .handler
                    .upsert_artifact(deserialize_params(params)?)
                    .await?;
                serialize_result(&artifact)
            }
            "artifacts.get" => {
                match self.handler.get_artifact(deserialize_params(params)?).await? {
                    Some(artifact) => serialize_result(&artifact),
                    None => Ok(Value::Null),
                }
            }
            "artifacts.list" => {
                let artifacts = self
                    .handler
                    .list_artifacts(deserialize_params(params)?)
                    .await?;
                serialize_result(&artifacts)
            }
            "requirements.list" => {
                let requirements = self
                    .handler
                    .list_requirements(deserialize_params(params)?)
                    .await?;
                serialize_result(&requirements)
            }
            "plan.read" => {
                let plan = self.handler.read_plan().await?;
                Ok(plan)
            }
            other => Err(McpError::MethodNotFound(other.to_string())),
        }
    }
}

/// The local-socket binding: accepts connections and serves each with its
/// own [`SurfaceServer`] session.
pub struct TcpSurfaceServer {
    local_addr: std::net::SocketAddr,
    accept_task: JoinHandle<()>,
}

impl TcpSurfaceServer {
    /// Bind the surface on `addr` (e.g. "127.0.0.1:0" for an ephemeral
    /// port) and start accepting in the background.
    pub async fn bind<H: SurfaceHandler + 'static>(
        addr: &str,
        handler: Arc<H>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "method surface listening");

        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "surface connection accepted");
                        let session = SurfaceServer::new(handler.clone());
                        tokio::spawn(async move {
                            let (read_half, write_half) = stream.into_split();
                            if let Err(e) = session.serve_stream(read_half, write_half).await {
                                error!("surface session error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("surface accept error: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Self {
            local_addr,
            accept_task,
        })
    }

    /// The bound address, handed to the LLM runner.
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections. In-flight sessions end when their peers
    /// disconnect.
    pub fn shutdown(self) {
        self.accept_task.abort();
    }
}
