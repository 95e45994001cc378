//! Session message forwarding.

use super::require_selection_param;
use crate::server::AppState;
use labeler_core::snapshot::write_snapshot;
use labeler_core::{HostMessage, LabelerError, ViewMessage};
use serde_json::Value;
use tracing::{info, warn};

/// Inbound view messages accepted as RPC methods.
const SESSION_METHODS: &[&str] = &[
    "start_classification",
    "deliver_results",
    "close",
    "init",
    "reset_settings",
    "update_settings",
    "bulk_reset",
    "request_export_list",
    "request_diagnostic_dump",
    "record_deep_link",
    "update_design_system_url",
];

pub(super) fn is_session_method(method: &str) -> bool {
    SESSION_METHODS.contains(&method)
}

/// Build a view message from the method name and its params object.
fn to_view_message(method: &str, params: Value) -> labeler_core::Result<ViewMessage> {
    let mut object = match params {
        Value::Object(object) => object,
        Value::Null => Default::default(),
        other => {
            return Err(LabelerError::InvalidParams {
                message: format!("params must be an object, got {}", other),
            })
        }
    };
    object.insert("type".to_string(), Value::String(method.to_string()));

    serde_json::from_value(Value::Object(object)).map_err(|e| LabelerError::InvalidParams {
        message: format!("Invalid params for {}: {}", method, e),
    })
}

/// Forward one message into the session queue.
pub(super) async fn forward(
    state: &AppState,
    method: &str,
    params: Value,
) -> labeler_core::Result<Vec<HostMessage>> {
    let message = to_view_message(method, params)?;
    let closing = matches!(message, ViewMessage::Close);
    let mut messages = state.session.send(message).await?;

    if closing {
        if let Some(path) = &state.document_path {
            match write_snapshot(path, &state.document.snapshot(), true) {
                Ok(()) => info!("Saved document to {}", path.display()),
                Err(e) => {
                    warn!("Failed to save document: {}", e);
                    messages.push(HostMessage::error(&e));
                }
            }
        }
    }

    Ok(messages)
}

/// Record the host's new selection and push the cached detail for it.
pub(super) async fn selection_changed(
    state: &AppState,
    params: &Value,
) -> labeler_core::Result<Vec<HostMessage>> {
    let selection = require_selection_param(params)?;
    state.document.set_selection(selection);
    Ok(vec![state.session.selection_detail().await?])
}
