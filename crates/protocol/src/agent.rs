//! Agent → Client payloads
//!
//! Side-channel topic payloads and the frames the realtime transport
//! delivers from the agent's room.

use serde::{Deserialize, Serialize};

use crate::types::Dimension;

/// Side-channel topic names. These are a contract with the agent.
pub mod topics {
    pub const HISTORY_BACKFILL: &str = "chat-history-backfill";
    pub const AGENT_STATE: &str = "agent-state-update";
    pub const DIMENSION_ANALYSIS: &str = "dimension-analysis-notification";
    pub const INACTIVITY_TIMEOUT: &str = "inactivity-timeout-notification";

    pub const ALL: [&str; 4] = [
        HISTORY_BACKFILL,
        AGENT_STATE,
        DIMENSION_ANALYSIS,
        INACTIVITY_TIMEOUT,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    DimensionAnalysis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Started,
    Completed,
}

/// Per-dimension analysis start/complete notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisNotification {
    #[serde(rename = "type")]
    pub kind: AnalysisKind,
    pub status: AnalysisStatus,
    pub dimension: Dimension,
}

impl AnalysisNotification {
    pub fn started(dimension: Dimension) -> Self {
        Self {
            kind: AnalysisKind::DimensionAnalysis,
            status: AnalysisStatus::Started,
            dimension,
        }
    }

    pub fn completed(dimension: Dimension) -> Self {
        Self {
            kind: AnalysisKind::DimensionAnalysis,
            status: AnalysisStatus::Completed,
            dimension,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InactivityKind {
    InactivityTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InactivityStatus {
    SessionEnded,
    #[serde(other)]
    Other,
}

/// Server-initiated forced session end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InactivityTimeoutNotification {
    #[serde(rename = "type")]
    pub kind: InactivityKind,
    pub status: InactivityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: String,
}

impl InactivityTimeoutNotification {
    pub fn session_ended(message: impl Into<String>) -> Self {
        Self {
            kind: InactivityKind::InactivityTimeout,
            status: InactivityStatus::SessionEnded,
            reason: Some("inactivity_timeout".to_string()),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryRole {
    User,
    Assistant,
    System,
    #[serde(other)]
    Other,
}

/// History row content is either plain text or a list of text parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HistoryContent {
    Text(String),
    Parts(Vec<String>),
}

impl HistoryContent {
    pub fn joined(&self) -> String {
        match self {
            HistoryContent::Text(text) => text.clone(),
            HistoryContent::Parts(parts) => parts.join("\n"),
        }
    }
}

/// One conversation turn from the backfill topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: HistoryRole,
    pub content: HistoryContent,
    /// Seconds or milliseconds since the epoch, whichever the agent sends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<f64>,
}

/// Live transcription segment; later updates with the same id replace text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptionSegment {
    pub id: String,
    pub text: String,
    pub participant_identity: String,
    /// Milliseconds since the epoch when the segment was first received.
    pub timestamp: i64,
    #[serde(default)]
    pub is_final: bool,
}

/// A chat message published on the room's chat channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub id: String,
    pub timestamp: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_identity: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Text,
    Byte,
}

/// Frames delivered by the realtime transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentFrame {
    Joined {
        local_identity: String,
    },
    ParticipantJoined {
        identity: String,
    },
    ParticipantLeft {
        identity: String,
    },
    StreamHeader {
        stream_id: String,
        topic: String,
        kind: StreamKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_identity: Option<String>,
    },
    /// Text chunks carry UTF-8 text; byte chunks carry base64.
    StreamChunk {
        stream_id: String,
        data: String,
    },
    StreamEnd {
        stream_id: String,
    },
    Transcription {
        segment: TranscriptionSegment,
    },
    Chat {
        message: ChatPayload,
    },
    RpcResponse {
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Disconnect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn analysis_notification_wire_shape() {
        let parsed: AnalysisNotification = serde_json::from_value(json!({
            "type": "dimension_analysis",
            "status": "started",
            "dimension": "Outcome"
        }))
        .unwrap();
        assert_eq!(parsed, AnalysisNotification::started(Dimension::Outcome));
    }

    #[test]
    fn analysis_notification_rejects_other_types() {
        let parsed = serde_json::from_value::<AnalysisNotification>(json!({
            "type": "something_else",
            "status": "started",
            "dimension": "Outcome"
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn inactivity_unknown_status_is_kept_as_other() {
        let parsed: InactivityTimeoutNotification = serde_json::from_value(json!({
            "type": "inactivity_timeout",
            "status": "warning",
            "message": "Still there?"
        }))
        .unwrap();
        assert_eq!(parsed.status, InactivityStatus::Other);
        assert_eq!(parsed.reason, None);
    }

    #[test]
    fn history_content_accepts_text_parts() {
        let item: HistoryItem = serde_json::from_value(json!({
            "role": "assistant",
            "content": ["Hello", "Shall we begin?"]
        }))
        .unwrap();
        assert_eq!(item.content.joined(), "Hello\nShall we begin?");

        let item: HistoryItem = serde_json::from_value(json!({
            "role": "developer",
            "content": "tool output"
        }))
        .unwrap();
        assert_eq!(item.role, HistoryRole::Other);
    }

    #[test]
    fn agent_frames_are_type_tagged() {
        let frame: AgentFrame = serde_json::from_value(json!({
            "type": "stream_header",
            "stream_id": "s1",
            "topic": topics::AGENT_STATE,
            "kind": "text"
        }))
        .unwrap();
        assert!(matches!(
            frame,
            AgentFrame::StreamHeader { ref topic, kind: StreamKind::Text, .. } if topic == topics::AGENT_STATE
        ));
    }
}
