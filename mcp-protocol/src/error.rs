//! Error handling for the method surface.
//!
//! Maps internal task errors to JSON-RPC 2.0 error codes. Transition
//! failures carry a structured `data` payload so the agent can recover
//! programmatically instead of parsing the message text.

use cycle_core::TaskError;
use serde_json::{json, Value};
use thiserror::Error;

/// Method-surface errors with their JSON-RPC code classes.
#[derive(Error, Debug)]
pub enum McpError {
    /// -32700: the request line was not valid JSON
    #[error("parse error: {0}")]
    Parse(String),

    /// -32600: structurally valid JSON that is not a valid request
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// -32601: unknown method name
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// -32602: parameters rejected, optionally with a structured cause
    #[error("invalid params: {message}")]
    InvalidParams {
        message: String,
        data: Option<Value>,
    },

    /// -32603: internal error
    #[error("internal error: {0}")]
    Internal(String),

    /// -32001: resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// -32002: the active role lacks the capability, or the deadline passed
    #[error("forbidden: {0}")]
    Forbidden(String),
}

impl McpError {
    /// Invalid-params error without a data payload.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
            data: None,
        }
    }

    /// Convert to the JSON-RPC error code.
    pub fn to_error_code(&self) -> i32 {
        match self {
            McpError::Parse(_) => -32700,
            McpError::InvalidRequest(_) => -32600,
            McpError::MethodNotFound(_) => -32601,
            McpError::InvalidParams { .. } => -32602,
            McpError::Internal(_) => -32603,
            McpError::NotFound(_) => -32001,
            McpError::Forbidden(_) => -32002,
        }
    }

    /// Convert to a complete JSON-RPC error response.
    pub fn to_json_rpc_error(&self, id: Option<Value>) -> Value {
        let mut error = json!({
            "code": self.to_error_code(),
            "message": self.to_string(),
        });

        if let McpError::InvalidParams { data: Some(data), .. } = self {
            error["data"] = data.clone();
        }

        json!({
            "jsonrpc": "2.0",
            "error": error,
            "id": id,
        })
    }
}

/// Convert from TaskError to McpError
impl From<TaskError> for McpError {
    fn from(err: TaskError) -> Self {
        let message = err.to_string();
        match err {
            TaskError::NotFound(_) => McpError::NotFound(message),
            TaskError::NoTasks | TaskError::NoSelectableTasks(_) => McpError::NotFound(message),

            TaskError::Forbidden(msg) => McpError::Forbidden(msg),
            TaskError::DeadlineExceeded => McpError::Forbidden(message),

            TaskError::UnknownState(_) | TaskError::Validation(_) => {
                McpError::invalid_params(message)
            }

            TaskError::IllegalTransition { from, to, allowed } => McpError::InvalidParams {
                message,
                data: Some(json!({
                    "reason": "illegal_transition",
                    "from": from,
                    "to": to,
                    "allowed": allowed,
                })),
            },
            TaskError::DependencyIncomplete {
                task,
                dependency,
                dependency_state,
            } => McpError::InvalidParams {
                message,
                data: Some(json!({
                    "reason": "dependency_incomplete",
                    "task": task,
                    "dependency": dependency,
                    "dependency_state": dependency_state,
                })),
            },
            TaskError::DependencyUnresolved { task, dependency } => McpError::InvalidParams {
                message,
                data: Some(json!({
                    "reason": "dependency_unresolved",
                    "task": task,
                    "dependency": dependency,
                })),
            },
            TaskError::MissingHandover { from, to, artifact } => McpError::InvalidParams {
                message,
                data: Some(json!({
                    "reason": "missing_handover",
                    "from": from,
                    "to": to,
                    "artifact": artifact,
                })),
            },
            TaskError::EmptyHandover { artifact, version } => McpError::InvalidParams {
                message,
                data: Some(json!({
                    "reason": "empty_handover",
                    "artifact": artifact,
                    "version": version,
                })),
            },

            TaskError::Serialization(msg) => McpError::Internal(format!("serialization: {msg}")),
            TaskError::NoAgentConfigured(_)
            | TaskError::TaskBusy(_)
            | TaskError::Database(_)
            | TaskError::Protocol(_)
            | TaskError::Configuration(_)
            | TaskError::Internal(_) => McpError::Internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cycle_core::states::TaskState;

    #[test]
    fn test_error_codes() {
        assert_eq!(McpError::Parse("bad json".into()).to_error_code(), -32700);
        assert_eq!(
            McpError::InvalidRequest("no id".into()).to_error_code(),
            -32600
        );
        assert_eq!(
            McpError::MethodNotFound("tasks.destroy".into()).to_error_code(),
            -32601
        );
        assert_eq!(
            McpError::invalid_params("bad state").to_error_code(),
            -32602
        );
        assert_eq!(McpError::Internal("oops".into()).to_error_code(), -32603);
        assert_eq!(McpError::NotFound("T1".into()).to_error_code(), -32001);
        assert_eq!(McpError::Forbidden("nope".into()).to_error_code(), -32002);
    }

    #[test]
    fn test_json_rpc_error_shape() {
        let error = McpError::NotFound("task 'T1'".into());
        let json_error = error.to_json_rpc_error(Some(json!(1)));

        assert_eq!(json_error["jsonrpc"], "2.0");
        assert_eq!(json_error["error"]["code"], -32001);
        assert_eq!(json_error["id"], 1);
        assert!(json_error["error"].get("data").is_none());
    }

    #[test]
    fn test_illegal_transition_carries_successors() {
        let err: McpError =
            TaskError::illegal_transition(TaskState::Reviewing, TaskState::Done).into();
        let response = err.to_json_rpc_error(Some(json!(7)));

        assert_eq!(response["error"]["code"], -32602);
        assert_eq!(response["error"]["data"]["reason"], "illegal_transition");
        let allowed = response["error"]["data"]["allowed"].as_array().unwrap();
        assert!(allowed.contains(&json!("ready_for_commit")));
        assert!(allowed.contains(&json!("needs_fixes")));
    }

    #[test]
    fn test_missing_handover_data() {
        let err: McpError = TaskError::MissingHandover {
            from: TaskState::Planning,
            to: TaskState::ReadyForImplementation,
            artifact: "implementation_plan".into(),
        }
        .into();
        let response = err.to_json_rpc_error(None);

        assert_eq!(response["error"]["data"]["reason"], "missing_handover");
        assert_eq!(
            response["error"]["data"]["artifact"],
            "implementation_plan"
        );
    }

    #[test]
    fn test_deadline_maps_to_forbidden() {
        let err: McpError = TaskError::DeadlineExceeded.into();
        assert_eq!(err.to_error_code(), -32002);
        assert!(err.to_string().contains("deadline_exceeded"));
    }

    #[test]
    fn test_selection_failures_map_to_not_found() {
        let err: McpError = TaskError::NoTasks.into();
        assert_eq!(err.to_error_code(), -32001);
    }
}
