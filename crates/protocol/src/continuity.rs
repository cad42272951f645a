//! Session continuity HTTP bodies

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CHECK_PATH: &str = "/session/check";
pub const CLEAR_PATH: &str = "/session/clear";
pub const SAVE_PATH: &str = "/session/save";

pub const CLEARED_MESSAGE: &str = "Session cleared successfully";
pub const NOTHING_TO_CLEAR_MESSAGE: &str = "No session data found to clear";

/// `GET /session/check`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCheckResponse {
    pub has_session: bool,
    pub session_data: Option<Value>,
}

impl SessionCheckResponse {
    /// The agent stores the assessment snapshot under `custom_state`.
    pub fn custom_state(&self) -> Option<&Value> {
        self.session_data
            .as_ref()
            .and_then(|data| data.get("custom_state"))
            .filter(|state| !state.is_null())
    }
}

/// `DELETE /session/clear`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClearResponse {
    pub success: bool,
    pub message: String,
}

impl SessionClearResponse {
    pub fn cleared(existed: bool) -> Self {
        Self {
            success: true,
            message: if existed {
                CLEARED_MESSAGE
            } else {
                NOTHING_TO_CLEAR_MESSAGE
            }
            .to_string(),
        }
    }
}
