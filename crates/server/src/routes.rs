//! Continuity HTTP routes.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, put},
    Extension, Json, Router,
};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, info_span};

use assessment_protocol::continuity::{
    SessionCheckResponse, SessionClearResponse, CHECK_PATH, CLEAR_PATH, SAVE_PATH,
};

use crate::auth::{auth_middleware, Identity};
use crate::state::AppState;
use crate::store::{session_key, StoreError};

const CHECK_FAILED: &str = "Internal server error while checking session";
const CLEAR_FAILED: &str = "Internal server error while clearing session";
const SAVE_FAILED: &str = "Internal server error while saving session";

pub fn router(state: Arc<AppState>) -> Router {
    let run_id = state.run_id.clone();
    let make_span = move |req: &Request<Body>| {
        info_span!(
            "request",
            run_id = %run_id,
            method = %req.method(),
            path = %req.uri().path(),
        )
    };

    Router::new()
        .route(CHECK_PATH, get(check_session))
        .route(CLEAR_PATH, delete(clear_session))
        .route(SAVE_PATH, put(save_session))
        .route("/health", get(health_handler))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(make_span))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

fn internal_error(event: &'static str, message: &'static str, err: StoreError) -> Response {
    error!(
        component = "routes",
        event = event,
        error = %err,
        "Continuity store failed"
    );
    (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
}

async fn check_session(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Response {
    match state.store.load(&session_key(&identity.email)).await {
        Ok(session_data) => Json(SessionCheckResponse {
            has_session: session_data.is_some(),
            session_data,
        })
        .into_response(),
        Err(e) => internal_error("session.check_failed", CHECK_FAILED, e),
    }
}

async fn clear_session(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> Response {
    match state.store.delete(&session_key(&identity.email)).await {
        Ok(existed) => {
            info!(
                component = "routes",
                event = "session.cleared",
                existed = existed,
                "Cleared continuity record"
            );
            Json(SessionClearResponse::cleared(existed)).into_response()
        }
        Err(e) => internal_error("session.clear_failed", CLEAR_FAILED, e),
    }
}

async fn save_session(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Json(data): Json<Value>,
) -> Response {
    match state.store.save(&session_key(&identity.email), &data).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => internal_error("session.save_failed", SAVE_FAILED, e),
    }
}

async fn health_handler() -> impl IntoResponse {
    "OK"
}
