//! Application state

use std::sync::Arc;

use crate::auth::TokenDirectory;
use crate::store::SessionStore;

/// Shared application state
pub struct AppState {
    /// Continuity records
    pub store: Arc<dyn SessionStore>,

    /// Bearer token → identity
    pub tokens: TokenDirectory,

    /// Attached to every request span
    pub run_id: Arc<str>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn SessionStore>,
        tokens: TokenDirectory,
        run_id: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            store,
            tokens,
            run_id: run_id.into(),
        }
    }
}
