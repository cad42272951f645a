//! Assessment Protocol
//!
//! Shared types for the maturity assessment client, the remote agent's
//! side-channel payloads and the session continuity service.
//! Everything here is serialized as JSON.

use uuid::Uuid;

pub mod agent;
pub mod client;
pub mod continuity;
#[cfg(feature = "log-filter")]
pub mod log_filter;
pub mod types;

pub use agent::{AgentFrame, AnalysisNotification, HistoryItem, InactivityTimeoutNotification};
pub use client::ClientFrame;
pub use types::*;

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
