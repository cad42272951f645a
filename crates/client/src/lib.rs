//! Assessment client core
//!
//! Keeps a voice/chat maturity assessment in sync with the remote agent:
//! transport lifecycle, side-channel routing, the merged message timeline,
//! the persisted dimension state, analysis tracking, and session continuity.

pub mod analysis;
pub mod config;
pub mod continuity;
pub mod dimension_store;
pub mod error;
pub mod inactivity;
pub mod lifecycle;
pub mod notice;
pub mod router;
pub mod session;
pub mod session_actor;
pub mod session_command;
pub mod storage;
pub mod timeline;
pub mod transport;
pub mod view;

pub use config::ClientConfig;
pub use error::{ContinuityError, DecodeError, StorageError, TransportError};
pub use lifecycle::TransportSession;
pub use session::{AssessmentSession, SessionSettings, SessionSnapshot};
pub use session_actor::SessionActorHandle;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
