//! Response wrapping for the view.
//!
//! The view expects `{success: bool, messages: [...], error?: string}` for
//! every call. Session handlers report failures as `error` notices inside the
//! message list, so `success` and `error` are derived from that list.

use labeler_core::HostMessage;
use serde_json::{json, Value};

/// Wrap outbound messages into the shape the view expects.
pub fn wrap_messages(messages: &[HostMessage]) -> Value {
    let first_error = messages.iter().find_map(|m| match m {
        HostMessage::Error { message, .. } => Some(message.clone()),
        _ => None,
    });

    let mut wrapped = json!({
        "success": first_error.is_none(),
        "messages": messages,
    });
    if let Some(error) = first_error {
        wrapped["error"] = Value::String(error);
    }
    wrapped
}
