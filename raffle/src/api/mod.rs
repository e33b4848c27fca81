//! HTTP API handlers.
//!
//! - Orders: intake and buyer-side payment steps (`/api/orders`)
//! - Raffles: public sold-ticket counts (`/api/raffles`)
//! - Admin: review queue, approvals, dashboard (`/api/admin`)
//!
//! Successful responses are `{ "success": true, ...payload }`; failures use
//! the [`raffle_web::AppError`] envelope.

pub mod admin;
pub mod orders;
pub mod raffles;

use crate::types::OrderId;
use axum::Json;
use axum::extract::rejection::JsonRejection;
use raffle_web::{AppError, WebResult};
use serde::Serialize;
use uuid::Uuid;

/// Success envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    /// Always `true`
    pub success: bool,
    /// Payload fields, inlined
    #[serde(flatten)]
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    /// Wrap a payload.
    pub fn ok(data: T) -> Json<Self> {
        Json(Self { success: true, data })
    }
}

/// Order id from a path segment; 400 when it is not a UUID.
pub(crate) fn parse_order_id(raw: &str) -> WebResult<OrderId> {
    Uuid::parse_str(raw.trim())
        .map(OrderId::from_uuid)
        .map_err(|_| AppError::bad_request(format!("invalid order id: {raw}")))
}

/// JSON body, with malformed input answered in the error envelope.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> WebResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::bad_request(rejection.body_text()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_order_id_must_be_uuid() {
        let id = Uuid::new_v4();
        assert_eq!(
            parse_order_id(&id.to_string()).ok(),
            Some(OrderId::from_uuid(id))
        );
        assert_eq!(
            parse_order_id("42").map_err(|e| e.status()).err(),
            Some(StatusCode::BAD_REQUEST)
        );
    }
}
