//! JSON-RPC request handlers.

mod session;

use crate::server::AppState;
use crate::wrapper::wrap_messages;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use labeler_core::{LabelerError, NodeId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error};

/// JSON-RPC "method not found".
const METHOD_NOT_FOUND: i32 = -32601;

// ============================================================================
// JSON-RPC types
// ============================================================================

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 error structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(JsonRpcError {
                code,
                message,
                data: None,
            }),
            id,
        }
    }
}

/// Dispatch failure: either an unknown method or a library error.
enum DispatchError {
    UnknownMethod(String),
    Labeler(LabelerError),
}

impl From<LabelerError> for DispatchError {
    fn from(err: LabelerError) -> Self {
        DispatchError::Labeler(err)
    }
}

// ============================================================================
// Parameter extraction helpers
// ============================================================================

/// Extract the node id list for `selection_changed`.
pub(crate) fn require_selection_param(params: &Value) -> labeler_core::Result<Vec<NodeId>> {
    let value = params
        .get("selection")
        .cloned()
        .ok_or_else(|| LabelerError::InvalidParams {
            message: "Missing required parameter: selection".to_string(),
        })?;
    serde_json::from_value(value).map_err(|e| LabelerError::InvalidParams {
        message: format!("selection must be a list of node ids: {}", e),
    })
}

// ============================================================================
// HTTP endpoints
// ============================================================================

/// Health check endpoint.
pub async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Main JSON-RPC handler.
pub async fn handle_rpc(
    State(state): State<Arc<AppState>>,
    Json(request): Json<JsonRpcRequest>,
) -> impl IntoResponse {
    let method = request.method.as_str();
    let params = request.params.unwrap_or(Value::Object(Default::default()));
    let id = request.id.clone();

    debug!("RPC call: {}({:?})", method, params);

    if method == "health_check" {
        return (
            StatusCode::OK,
            Json(JsonRpcResponse::success(id, json!({"status": "ok"}))),
        );
    }

    match dispatch_method(&state, method, params).await {
        Ok(value) => (StatusCode::OK, Json(JsonRpcResponse::success(id, value))),
        Err(DispatchError::UnknownMethod(name)) => (
            StatusCode::OK,
            Json(JsonRpcResponse::error(
                id,
                METHOD_NOT_FOUND,
                format!("Method not found: {}", name),
            )),
        ),
        Err(DispatchError::Labeler(e)) => {
            error!("RPC error for {}: {}", method, e);
            (
                StatusCode::OK,
                Json(JsonRpcResponse::error(id, e.to_rpc_error_code(), e.to_string())),
            )
        }
    }
}

// ============================================================================
// Method dispatcher
// ============================================================================

async fn dispatch_method(
    state: &AppState,
    method: &str,
    params: Value,
) -> Result<Value, DispatchError> {
    let messages = match method {
        "selection_changed" => session::selection_changed(state, &params).await?,
        m if session::is_session_method(m) => session::forward(state, m, params).await?,
        _ => return Err(DispatchError::UnknownMethod(method.to_string())),
    };
    Ok(wrap_messages(&messages))
}
