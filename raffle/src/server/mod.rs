//! HTTP server for the raffle order service.
//!
//! - Application state shared by the handlers
//! - Health and readiness endpoints
//! - Router with tracing, CORS and correlation-id layers

pub mod health;
pub mod routes;
pub mod state;

pub use health::{health_check, readiness_check};
pub use routes::build_router;
pub use state::AppState;
