//! Bridge wire format: one JSON object per line in each direction

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::cache::PermissionDecision;

/// Request type tag understood by the bridge
pub const PERMISSION_REQUEST: &str = "permission_request";

/// Helper → bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeRequest {
    /// Always [`PERMISSION_REQUEST`]
    #[serde(rename = "type")]
    pub kind: String,
    /// Tool the agent wants to run
    #[serde(alias = "tool")]
    pub tool_name: String,
    /// Tool arguments
    #[serde(default, alias = "input")]
    pub tool_input: Value,
}

impl BridgeRequest {
    /// A permission request for `tool_name`
    pub fn permission(tool_name: impl Into<String>, tool_input: Value) -> Self {
        Self {
            kind: PERMISSION_REQUEST.to_string(),
            tool_name: tool_name.into(),
            tool_input,
        }
    }
}

/// Bridge → helper
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeResponse {
    /// Whether the call may proceed
    pub granted: bool,
    /// Reason, on denial
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// The decision, on grant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<PermissionDecision>,
}

impl BridgeResponse {
    /// Granted with `decision`
    #[must_use]
    pub const fn granted(decision: PermissionDecision) -> Self {
        Self {
            granted: true,
            message: None,
            decision: Some(decision),
        }
    }

    /// Denied with a reason
    pub fn denied(message: impl Into<String>) -> Self {
        Self {
            granted: false,
            message: Some(message.into()),
            decision: None,
        }
    }
}
