//! Serialization utilities for the method surface.
//!
//! Handles the JSON-RPC envelope and typed parameter extraction.

use crate::error::McpError;
use serde::Deserialize;
use serde_json::{json, Value};

/// Deserialize a typed parameter struct from the request's `params` value.
pub fn deserialize_params<T>(params: Value) -> Result<T, McpError>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_value(params).map_err(|e| McpError::invalid_params(e.to_string()))
}

/// Serialize a handler result into the response `result` value.
pub fn serialize_result<T: serde::Serialize>(value: &T) -> Result<Value, McpError> {
    serde_json::to_value(value).map_err(|e| McpError::Internal(e.to_string()))
}

/// Create a successful JSON-RPC response.
pub fn create_success_response(id: Option<Value>, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": id,
    })
}

// Re-export parameter types from core for convenience
pub use cycle_core::{
    AppendNoteParams, GetArtifactParams, GetTaskParams, ListArtifactsParams, ListRequirementsParams,
    ListTasksParams, UpdateStateParams, UpsertArtifactParams,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_update_state_params() {
        let params = json!({
            "task_id": "T1",
            "state": "planning",
            "note": "starting"
        });

        let parsed: UpdateStateParams = deserialize_params(params).unwrap();
        assert_eq!(parsed.task_id, "T1");
        assert_eq!(parsed.state, "planning");
        assert_eq!(parsed.note.as_deref(), Some("starting"));
    }

    #[test]
    fn test_deserialize_rejects_missing_fields() {
        let params = json!({"task_id": "T1"});
        let result: Result<UpdateStateParams, _> = deserialize_params(params);
        assert!(matches!(
            result.unwrap_err(),
            McpError::InvalidParams { .. }
        ));
    }

    #[test]
    fn test_success_response() {
        let response = create_success_response(Some(json!(1)), json!({"ok": true}));
        assert_eq!(response["jsonrpc"], "2.0");
        assert_eq!(response["id"], 1);
        assert_eq!(response["result"]["ok"], true);
    }
}
