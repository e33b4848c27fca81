//! Axum glue for the raffle order service.
//!
//! Every handler in the service speaks the same JSON envelope:
//!
//! ```text
//! success: { "success": true,  ...payload }
//! failure: { "success": false, "code": "CONFLICT", "error": "...", "message": "...",
//!            "step": null, "correlation_id": null }
//! ```
//!
//! This crate owns the failure half of that envelope ([`AppError`]), the
//! request extractors the handlers share ([`CorrelationId`], [`BearerToken`],
//! [`Locale`]) and the correlation-id middleware that ties log lines of one
//! request together.
//!
//! # Example
//!
//! ```ignore
//! use raffle_web::{AppError, BearerToken, WebResult};
//! use axum::{Router, routing::post, Json};
//!
//! async fn approve(
//!     token: BearerToken,
//!     Path(order_id): Path<Uuid>,
//! ) -> WebResult<Json<ApproveResponse>> {
//!     let admin = authorize(&token).await?;
//!     ...
//! }
//!
//! let app = Router::new()
//!     .route("/api/admin/transfers/:id/approve", post(approve))
//!     .layer(correlation_id_layer());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod middleware;

pub use error::AppError;
pub use extractors::{BearerToken, CorrelationId, Locale};
pub use middleware::{correlation_id_layer, current_correlation_id, CORRELATION_ID_HEADER};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
