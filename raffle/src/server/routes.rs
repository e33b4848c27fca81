//! Router configuration.

use super::health::{health_check, readiness_check};
use super::state::AppState;
use crate::api::{admin, orders, raffles};
use axum::{
    Router,
    http::HeaderValue,
    routing::{get, post},
};
use raffle_web::correlation_id_layer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
///
/// - `/health`, `/ready`: no authentication
/// - `/api/orders/...`, `/api/raffles/...`: buyer routes
/// - `/api/admin/...`: bearer token of an admin
///
/// `cors_origins` lists the allowed browser origins; empty allows any.
pub fn build_router(state: AppState, cors_origins: &[String]) -> Router {
    let buyer_routes = Router::new()
        .route("/orders", post(orders::create_order))
        .route("/orders/:id/transfer-notify", post(orders::notify_transfer))
        .route("/orders/:id/transfer-proof", post(orders::attach_transfer_proof))
        .route("/orders/:id/card-checkout", post(orders::start_card_checkout))
        .route("/orders/:id/card-confirm", post(orders::confirm_card_payment))
        .route("/raffles/sold", get(raffles::sold_counts));

    let admin_routes = Router::new()
        .route("/dashboard", get(admin::dashboard))
        .route("/transfers", get(admin::list_transfers))
        .route("/transfers/:id/approve", post(admin::approve_transfer))
        .route("/transfers/:id/reject", post(admin::reject_transfer))
        .route("/orders/:id", get(admin::order_detail))
        .route("/orders/:id/resend-invoice", post(admin::resend_invoice));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .nest("/api", buyer_routes.nest("/admin", admin_routes))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
        .layer(correlation_id_layer())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    if origins.is_empty() {
        return layer.allow_origin(tower_http::cors::Any);
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}
