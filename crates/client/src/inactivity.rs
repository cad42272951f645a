//! Inactivity monitor — reacts to the server closing an idle session.

use tracing::debug;

use assessment_protocol::agent::InactivityStatus;
use assessment_protocol::InactivityTimeoutNotification;

use crate::notice::UserNotice;

pub const DEFAULT_INACTIVITY_MESSAGE: &str =
    "Your session has been automatically closed due to inactivity";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InactivityAction {
    /// Show the notice, reset local progress, and disconnect.
    EndSession { notice: UserNotice },
    Ignore,
}

pub fn evaluate(notification: &InactivityTimeoutNotification) -> InactivityAction {
    match notification.status {
        InactivityStatus::SessionEnded => {
            let message = if notification.message.trim().is_empty() {
                DEFAULT_INACTIVITY_MESSAGE
            } else {
                notification.message.as_str()
            };
            InactivityAction::EndSession {
                notice: UserNotice::session_ended(message),
            }
        }
        InactivityStatus::Other => {
            debug!(
                component = "inactivity",
                event = "inactivity.status_ignored",
                reason = ?notification.reason,
                "Ignoring inactivity notification with unknown status"
            );
            InactivityAction::Ignore
        }
    }
}
