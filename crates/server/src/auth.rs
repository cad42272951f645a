//! Identity middleware.
//!
//! Every request except `/health` must carry `Authorization: Bearer <token>`.
//! The token is looked up in the token directory loaded at startup; the
//! resolved email must belong to the allowed domain when one is configured.
//! The request then carries an [`Identity`] extension.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::state::AppState;

pub const UNAUTHORIZED_MESSAGE: &str = "Unauthorized: No user session found";

/// The signed-in user, by email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub email: String,
}

#[derive(Deserialize)]
struct TokensFile {
    #[serde(default)]
    tokens: Vec<TokenEntry>,
}

#[derive(Deserialize)]
struct TokenEntry {
    token: String,
    email: String,
}

/// Bearer token → email, plus the optional domain restriction.
#[derive(Debug, Default)]
pub struct TokenDirectory {
    tokens: HashMap<String, String>,
    allowed_domain: Option<String>,
}

impl TokenDirectory {
    pub fn new(
        tokens: impl IntoIterator<Item = (String, String)>,
        allowed_domain: Option<String>,
    ) -> Self {
        Self {
            tokens: tokens.into_iter().collect(),
            allowed_domain: allowed_domain
                .map(|d| d.trim_start_matches('@').to_ascii_lowercase()),
        }
    }

    /// Parse a TOML file of `[[tokens]] token = "...", email = "..."`.
    pub fn from_toml(raw: &str, allowed_domain: Option<String>) -> anyhow::Result<Self> {
        let file: TokensFile = toml::from_str(raw)?;
        Ok(Self::new(
            file.tokens.into_iter().map(|e| (e.token, e.email)),
            allowed_domain,
        ))
    }

    pub fn load(path: &Path, allowed_domain: Option<String>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading tokens file {}", path.display()))?;
        Self::from_toml(&raw, allowed_domain)
            .with_context(|| format!("parsing tokens file {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn resolve(&self, token: &str) -> Option<Identity> {
        let email = self.tokens.get(token)?;
        if let Some(domain) = &self.allowed_domain {
            let in_domain = email
                .rsplit_once('@')
                .is_some_and(|(_, d)| d.eq_ignore_ascii_case(domain));
            if !in_domain {
                warn!(
                    component = "auth",
                    event = "auth.domain_rejected",
                    allowed_domain = %domain,
                    "Token resolved to an identity outside the allowed domain"
                );
                return None;
            }
        }
        Some(Identity {
            email: email.clone(),
        })
    }
}

fn bearer_token(req: &Request<Body>) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// Axum middleware that resolves the caller's identity.
/// Skips authentication for the `/health` endpoint.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    if req.uri().path() == "/health" {
        return next.run(req).await;
    }

    let identity = bearer_token(&req).and_then(|token| state.tokens.resolve(token));
    match identity {
        Some(identity) => {
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        None => {
            debug!(
                component = "auth",
                event = "auth.unauthorized",
                path = %req.uri().path(),
                "Rejected request without a valid identity"
            );
            (StatusCode::UNAUTHORIZED, UNAUTHORIZED_MESSAGE).into_response()
        }
    }
}
