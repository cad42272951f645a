//! Commands sent to the session actor by the transport driver and the UI.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::oneshot;

use assessment_protocol::agent::{ChatPayload, TranscriptionSegment};

use crate::error::DecodeError;
use crate::notice::UiEvent;
use crate::session::SessionSnapshot;

pub enum SessionCommand {
    // -- Transport lifecycle --
    Connected {
        local_identity: String,
    },
    Disconnected {
        reason: Option<String>,
    },
    ParticipantJoined {
        identity: String,
    },
    ParticipantLeft {
        identity: String,
    },

    // -- Live timeline sources --
    Transcription {
        segment: TranscriptionSegment,
        is_local: bool,
    },
    Chat {
        message: ChatPayload,
        is_local: bool,
    },

    // -- User actions --
    /// Dismiss partial feedback and move on.
    ContinueWithNextDimension,
    Reset,
    /// Resume path: seed local state from the continuity record.
    SeedFromContinuity {
        custom_state: Value,
        reply: oneshot::Sender<Result<(), DecodeError>>,
    },

    // -- Internal --
    AnalysisTimerElapsed {
        generation: u64,
    },

    // -- Queries --
    GetSnapshot {
        reply: oneshot::Sender<Arc<SessionSnapshot>>,
    },

    Shutdown,
}

/// What the actor asks its driver to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutput {
    Ui(UiEvent),
    RequestDisconnect,
}
