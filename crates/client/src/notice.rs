//! User-facing notices and UI-level events emitted by the session.

use serde::Serialize;

pub const CONNECT_FAILED_TITLE: &str = "There was an error connecting to the agent";
pub const MEDIA_DEVICES_TITLE: &str = "Encountered an error with your media devices";
pub const SESSION_ENDED_TITLE: &str = "Session Ended";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Session cannot continue; no retry offered.
    Fatal,
    Dismissible,
    /// Stays until the user acts on it.
    Persistent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserNotice {
    pub severity: Severity,
    pub title: String,
    pub description: Option<String>,
}

impl UserNotice {
    pub fn connect_failed(error: impl Into<String>) -> Self {
        Self {
            severity: Severity::Fatal,
            title: CONNECT_FAILED_TITLE.to_string(),
            description: Some(error.into()),
        }
    }

    pub fn media_devices(error: impl Into<String>) -> Self {
        Self {
            severity: Severity::Dismissible,
            title: MEDIA_DEVICES_TITLE.to_string(),
            description: Some(error.into()),
        }
    }

    pub fn session_ended(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Persistent,
            title: SESSION_ENDED_TITLE.to_string(),
            description: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    Notice(UserNotice),
    /// The transport dropped; return to the welcome view.
    SessionFinished,
    /// The server closed the session; local progress was reset.
    SessionEnded,
}
