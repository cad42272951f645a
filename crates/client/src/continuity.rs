//! Session continuity client
//!
//! Asks the continuity service whether the signed-in user has a resumable
//! session, clears it on "start new", and seeds the local store from it on
//! "resume". Each endpoint tracks its own loading and error state.

use std::sync::Mutex;

use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use tracing::{info, warn};

use assessment_protocol::continuity::{
    SessionCheckResponse, SessionClearResponse, CHECK_PATH, CLEAR_PATH,
};

use crate::error::{ContinuityError, DecodeError};
use crate::session_actor::SessionActorHandle;
use crate::session_command::SessionCommand;

const CHECK_FAILED: &str = "Failed to check session";
const CLEAR_FAILED: &str = "Failed to clear session";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestStatus {
    pub is_loading: bool,
    pub error: Option<String>,
}

/// What the welcome view offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WelcomeOffer {
    ResumeOrStartNew,
    StartNewOnly,
}

pub struct ContinuityClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    check: Mutex<RequestStatus>,
    clear: Mutex<RequestStatus>,
    last_check: Mutex<Option<SessionCheckResponse>>,
}

impl ContinuityClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            check: Mutex::new(RequestStatus::default()),
            clear: Mutex::new(RequestStatus::default()),
            last_check: Mutex::new(None),
        }
    }

    pub fn check_status(&self) -> RequestStatus {
        self.check.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn clear_status(&self) -> RequestStatus {
        self.clear.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn last_check(&self) -> Option<SessionCheckResponse> {
        self.last_check.lock().ok().and_then(|c| c.clone())
    }

    pub fn welcome_offer(&self) -> WelcomeOffer {
        match self.last_check() {
            Some(check) if check.has_session => WelcomeOffer::ResumeOrStartNew,
            _ => WelcomeOffer::StartNewOnly,
        }
    }

    pub async fn check_session(&self) -> Result<SessionCheckResponse, ContinuityError> {
        let request = self.http.get(format!("{}{}", self.base_url, CHECK_PATH));
        let result: Result<SessionCheckResponse, _> =
            tracked(&self.check, self.send(request, CHECK_FAILED)).await;

        if let Ok(response) = &result {
            info!(
                component = "continuity",
                event = "continuity.checked",
                has_session = response.has_session,
                "Checked for resumable session"
            );
            if let Ok(mut last) = self.last_check.lock() {
                *last = Some(response.clone());
            }
        }
        result
    }

    /// Re-run the check when the welcome view is shown again, so the offer
    /// reflects a record saved or cleared during the last session.
    pub async fn refetch(&self) -> Result<WelcomeOffer, ContinuityError> {
        self.check_session().await?;
        Ok(self.welcome_offer())
    }

    pub async fn clear_session(&self) -> Result<SessionClearResponse, ContinuityError> {
        let request = self.http.delete(format!("{}{}", self.base_url, CLEAR_PATH));
        let result: Result<SessionClearResponse, _> =
            tracked(&self.clear, self.send(request, CLEAR_FAILED)).await;

        if let Ok(response) = &result {
            info!(
                component = "continuity",
                event = "continuity.cleared",
                message = %response.message,
                "Cleared server session"
            );
            if let Ok(mut last) = self.last_check.lock() {
                *last = None;
            }
        }
        result
    }

    /// Clear the server-side record and reset local progress.
    pub async fn start_new_assessment(
        &self,
        actor: &SessionActorHandle,
    ) -> Result<SessionClearResponse, ContinuityError> {
        let response = self.clear_session().await?;
        actor.send(SessionCommand::Reset).await;
        Ok(response)
    }

    /// Seed local state from the last check's `custom_state`.
    /// Returns `false` when there was nothing to seed from.
    pub async fn resume_assessment(
        &self,
        actor: &SessionActorHandle,
    ) -> Result<bool, DecodeError> {
        let Some(custom_state) = self
            .last_check()
            .and_then(|check| check.custom_state().cloned())
        else {
            return Ok(false);
        };

        let (reply, rx) = oneshot::channel();
        actor
            .send(SessionCommand::SeedFromContinuity {
                custom_state,
                reply,
            })
            .await;
        match rx.await {
            Ok(Ok(())) => Ok(true),
            Ok(Err(e)) => {
                warn!(
                    component = "continuity",
                    event = "continuity.resume_rejected",
                    error = %e,
                    "Stored session state could not be restored"
                );
                Err(e)
            }
            Err(_) => Ok(false),
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        default_error: &str,
    ) -> Result<T, ContinuityError> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body = if body.trim().is_empty() {
                default_error.to_string()
            } else {
                body
            };
            return Err(ContinuityError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<T>().await?)
    }
}

/// Run `fut` with `status` marked loading; record its error afterwards.
async fn tracked<T, F>(status: &Mutex<RequestStatus>, fut: F) -> Result<T, ContinuityError>
where
    F: std::future::Future<Output = Result<T, ContinuityError>>,
{
    if let Ok(mut s) = status.lock() {
        s.is_loading = true;
        s.error = None;
    }
    let result = fut.await;
    if let Ok(mut s) = status.lock() {
        s.is_loading = false;
        s.error = result.as_ref().err().map(|e| e.to_string());
    }
    if let Err(e) = &result {
        warn!(
            component = "continuity",
            event = "continuity.request_failed",
            error = %e,
            "Continuity request failed"
        );
    }
    result
}
