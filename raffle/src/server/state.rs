//! Application state for the HTTP server.

use crate::auth::AdminAuthorizer;
use crate::reconcile::Reconciler;
use axum::extract::FromRef;
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// Cloned per request; every field is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Order lifecycle operations and the store behind them
    pub reconciler: Arc<Reconciler>,
    /// Admin token checks
    pub authorizer: Arc<dyn AdminAuthorizer>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(reconciler: Arc<Reconciler>, authorizer: Arc<dyn AdminAuthorizer>) -> Self {
        Self {
            reconciler,
            authorizer,
        }
    }
}

// Lets `RequireAdmin` pull the authorizer out of the state.
impl FromRef<AppState> for Arc<dyn AdminAuthorizer> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.authorizer)
    }
}
