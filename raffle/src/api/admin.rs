//! Back-office endpoints. Every handler requires an admin bearer token.
//!
//! - `GET  /api/admin/dashboard`
//! - `GET  /api/admin/transfers?status=pending_approval`
//! - `GET  /api/admin/orders/:id`
//! - `POST /api/admin/transfers/:id/approve`
//! - `POST /api/admin/transfers/:id/reject`
//! - `POST /api/admin/orders/:id/resend-invoice`

#![allow(clippy::missing_errors_doc)]

use super::{ApiResponse, parse_order_id};
use crate::aggregate::{self, Dashboard};
use crate::auth::RequireAdmin;
use crate::error::ReconcileError;
use crate::reconcile::{OrderDetail, OrderView, TransitionOutcome};
use crate::server::state::AppState;
use crate::types::OrderStatus;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
};
use raffle_web::{AppError, CorrelationId, WebResult};
use serde::{Deserialize, Serialize};

/// Query of the transfer review queue.
#[derive(Debug, Default, Deserialize)]
pub struct TransferQuery {
    /// Order status; `pending_approval` when absent
    pub status: Option<String>,
}

/// Review queue.
#[derive(Debug, Serialize)]
pub struct TransferListResponse {
    /// Orders, newest first
    pub orders: Vec<OrderView>,
    /// Number of orders returned
    pub count: usize,
}

/// Optional body of a rejection.
#[derive(Debug, Default, Deserialize)]
pub struct RejectRequest {
    /// Shown to the buyer; a default is used when blank
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct DashboardResponse {
    dashboard: Dashboard,
}

/// Sales and revenue figures. Never cached.
pub async fn dashboard(
    RequireAdmin(_admin): RequireAdmin,
    State(state): State<AppState>,
) -> WebResult<impl IntoResponse> {
    let dashboard = aggregate::dashboard(state.reconciler.store())
        .await
        .map_err(ReconcileError::from)?;

    Ok((
        [(header::CACHE_CONTROL, "no-store")],
        ApiResponse::ok(DashboardResponse { dashboard }),
    ))
}

/// Transfer orders in one status, with signed proof links.
pub async fn list_transfers(
    RequireAdmin(_admin): RequireAdmin,
    State(state): State<AppState>,
    Query(query): Query<TransferQuery>,
) -> WebResult<Json<ApiResponse<TransferListResponse>>> {
    let status = match query.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => raw
            .parse::<OrderStatus>()
            .map_err(|e| AppError::bad_request(e.to_string()))?,
        None => OrderStatus::PendingApproval,
    };

    let orders = state.reconciler.list_transfer_orders(status).await?;
    Ok(ApiResponse::ok(TransferListResponse {
        count: orders.len(),
        orders,
    }))
}

/// One order with buyer, payments and proof link.
pub async fn order_detail(
    RequireAdmin(_admin): RequireAdmin,
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> WebResult<Json<ApiResponse<OrderDetail>>> {
    let order_id = parse_order_id(&order_id)?;
    let detail = state.reconciler.order_detail(order_id).await?;
    Ok(ApiResponse::ok(detail))
}

/// Approve a transfer.
pub async fn approve_transfer(
    RequireAdmin(admin): RequireAdmin,
    CorrelationId(correlation_id): CorrelationId,
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> WebResult<Json<ApiResponse<TransitionOutcome>>> {
    let order_id = parse_order_id(&order_id)?;
    let outcome = state
        .reconciler
        .approve_transfer(order_id, &admin)
        .await
        .inspect_err(|e| log_failure(correlation_id, "approve_transfer", &order_id.to_string(), e))?;
    Ok(ApiResponse::ok(outcome))
}

/// Reject a transfer and release its tickets.
pub async fn reject_transfer(
    RequireAdmin(admin): RequireAdmin,
    CorrelationId(correlation_id): CorrelationId,
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    body: Option<Json<RejectRequest>>,
) -> WebResult<Json<ApiResponse<TransitionOutcome>>> {
    let order_id = parse_order_id(&order_id)?;
    let request = body.map(|Json(request)| request).unwrap_or_default();

    let outcome = state
        .reconciler
        .reject_transfer(order_id, request.reason.as_deref(), &admin)
        .await
        .inspect_err(|e| log_failure(correlation_id, "reject_transfer", &order_id.to_string(), e))?;
    Ok(ApiResponse::ok(outcome))
}

/// Send the order confirmation again.
pub async fn resend_invoice(
    RequireAdmin(admin): RequireAdmin,
    CorrelationId(correlation_id): CorrelationId,
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> WebResult<Json<ApiResponse<TransitionOutcome>>> {
    let order_id = parse_order_id(&order_id)?;
    let outcome = state
        .reconciler
        .resend_invoice(order_id, &admin)
        .await
        .inspect_err(|e| log_failure(correlation_id, "resend_invoice", &order_id.to_string(), e))?;
    Ok(ApiResponse::ok(outcome))
}

/// Partial failures need operator follow-up; the correlation id links the
/// warning to the request log line.
fn log_failure(correlation_id: uuid::Uuid, action: &str, order_id: &str, error: &ReconcileError) {
    match error {
        ReconcileError::PartialFailure { step, .. } => tracing::warn!(
            %correlation_id,
            action,
            order_id,
            %step,
            error = %error,
            "Admin action left the order partially updated"
        ),
        _ => tracing::debug!(%correlation_id, action, order_id, error = %error, "Admin action failed"),
    }
}
