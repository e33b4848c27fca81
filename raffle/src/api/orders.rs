//! Buyer order endpoints.
//!
//! - `POST /api/orders` - reserve tickets and create an order
//! - `POST /api/orders/:id/transfer-notify` - report a bank transfer
//! - `POST /api/orders/:id/transfer-proof` - record an uploaded proof
//! - `POST /api/orders/:id/card-checkout` - open the card payment page
//! - `POST /api/orders/:id/card-confirm` - settle a card payment
//!
//! Buyers have no session. Transfer endpoints are authorized by the contact
//! details on file for the order's client. Every response, failures
//! included, carries a `message` in the request's language.

#![allow(clippy::missing_errors_doc)]

use super::{ApiResponse, json_body, parse_order_id};
use crate::contact::ContactClaim;
use crate::messages::BuyerMessage;
use crate::reconcile::{CheckoutStarted, ReserveRequest, TransitionOutcome};
use crate::server::state::AppState;
use crate::store::Selection;
use crate::types::{ClientId, Order, OrderStatus, PaymentMethod, RaffleId, TicketNumber};
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use raffle_web::{AppError, Locale, WebResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to reserve tickets.
///
/// Exactly one of `quantity` (store picks the numbers) and `numbers` must
/// be given.
#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    /// Raffle to buy from
    pub raffle_id: Uuid,
    /// Registered buyer
    pub client_id: Uuid,
    /// How many random tickets
    pub quantity: Option<u32>,
    /// Specific ticket numbers
    pub numbers: Option<Vec<String>>,
    /// `card` or `transfer`
    pub payment_method: PaymentMethod,
    /// Object path of a proof uploaded beforehand
    pub transfer_proof_path: Option<String>,
}

impl CreateOrderRequest {
    fn into_reserve_request(self) -> WebResult<ReserveRequest> {
        let selection = match (self.quantity, self.numbers) {
            (Some(_), Some(_)) => {
                return Err(AppError::bad_request("give either quantity or numbers, not both"));
            }
            (Some(quantity), None) => Selection::Count(quantity),
            (None, Some(numbers)) => Selection::Numbers(
                numbers
                    .iter()
                    .map(|raw| TicketNumber::parse(raw))
                    .collect::<Result<_, _>>()
                    .map_err(|e| AppError::bad_request(e.to_string()))?,
            ),
            (None, None) => return Err(AppError::bad_request("quantity or numbers is required")),
        };

        Ok(ReserveRequest {
            raffle_id: RaffleId::from_uuid(self.raffle_id),
            client_id: ClientId::from_uuid(self.client_id),
            selection,
            payment_method: self.payment_method,
            transfer_proof_path: self.transfer_proof_path,
        })
    }
}

/// Response after creating an order.
#[derive(Debug, Serialize)]
pub struct OrderCreatedResponse {
    /// The new order
    pub order: Order,
    /// Message for the buyer
    pub message: &'static str,
}

/// Request to record a transfer proof.
#[derive(Debug, Deserialize)]
pub struct TransferProofRequest {
    /// Object path inside the proof bucket
    pub proof_path: String,
    /// Contact details proving ownership of the order
    #[serde(flatten)]
    pub contact: ContactClaim,
}

/// Request to settle a card payment.
#[derive(Debug, Deserialize)]
pub struct CardConfirmRequest {
    /// Provider payment id from the return URL
    #[serde(alias = "id")]
    pub provider_reference: String,
}

/// Response of a buyer-side transition.
#[derive(Debug, Serialize)]
pub struct BuyerTransitionResponse<T> {
    /// Transition result
    #[serde(flatten)]
    pub outcome: T,
    /// Message for the buyer
    pub message: &'static str,
}

// ============================================================================
// Handlers
// ============================================================================

/// Attach the buyer sentence for a failed request.
fn localized(locale: Locale, on_conflict: BuyerMessage) -> impl Fn(AppError) -> AppError {
    move |err| {
        let message = BuyerMessage::for_failure(err.status(), on_conflict);
        err.with_user_message(message.text(locale))
    }
}

/// Reserve tickets and create an order.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/orders \
///   -H "Content-Type: application/json" \
///   -d '{"raffle_id":"...","client_id":"...","quantity":2,"payment_method":"transfer"}'
/// ```
pub async fn create_order(
    State(state): State<AppState>,
    locale: Locale,
    payload: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> WebResult<(StatusCode, Json<ApiResponse<OrderCreatedResponse>>)> {
    let order = async {
        let request = json_body(payload)?.into_reserve_request()?;
        state.reconciler.reserve(request).await.map_err(AppError::from)
    }
    .await
    .map_err(localized(locale, BuyerMessage::TicketsUnavailable))?;

    Ok((
        StatusCode::CREATED,
        ApiResponse::ok(OrderCreatedResponse {
            order,
            message: BuyerMessage::Reserved.text(locale),
        }),
    ))
}

/// Report a bank transfer.
pub async fn notify_transfer(
    State(state): State<AppState>,
    locale: Locale,
    Path(order_id): Path<String>,
    payload: Result<Json<ContactClaim>, JsonRejection>,
) -> WebResult<Json<ApiResponse<BuyerTransitionResponse<TransitionOutcome>>>> {
    let outcome = async {
        let order_id = parse_order_id(&order_id)?;
        let claim = json_body(payload)?;
        state.reconciler.notify_transfer(order_id, &claim).await.map_err(AppError::from)
    }
    .await
    .map_err(localized(locale, BuyerMessage::OrderClosed))?;
    let message = BuyerMessage::for_transfer_status(outcome.status).text(locale);
    Ok(ApiResponse::ok(BuyerTransitionResponse { outcome, message }))
}

/// Record the storage path of an uploaded transfer proof.
pub async fn attach_transfer_proof(
    State(state): State<AppState>,
    locale: Locale,
    Path(order_id): Path<String>,
    payload: Result<Json<TransferProofRequest>, JsonRejection>,
) -> WebResult<Json<ApiResponse<BuyerTransitionResponse<TransitionOutcome>>>> {
    let outcome = async {
        let order_id = parse_order_id(&order_id)?;
        let request = json_body(payload)?;
        state
            .reconciler
            .attach_transfer_proof(order_id, &request.contact, &request.proof_path)
            .await
            .map_err(AppError::from)
    }
    .await
    .map_err(localized(locale, BuyerMessage::OrderClosed))?;
    let message = BuyerMessage::for_transfer_status(outcome.status).text(locale);
    Ok(ApiResponse::ok(BuyerTransitionResponse { outcome, message }))
}

/// Prepare the hosted card payment page.
pub async fn start_card_checkout(
    State(state): State<AppState>,
    locale: Locale,
    Path(order_id): Path<String>,
) -> WebResult<Json<ApiResponse<BuyerTransitionResponse<CheckoutStarted>>>> {
    let checkout = async {
        let order_id = parse_order_id(&order_id)?;
        state.reconciler.start_card_checkout(order_id).await.map_err(AppError::from)
    }
    .await
    .map_err(localized(locale, BuyerMessage::OrderClosed))?;
    Ok(ApiResponse::ok(BuyerTransitionResponse {
        outcome: checkout,
        message: BuyerMessage::CheckoutReady.text(locale),
    }))
}

/// Settle a card payment after the buyer returns from the payment page.
pub async fn confirm_card_payment(
    State(state): State<AppState>,
    locale: Locale,
    Path(order_id): Path<String>,
    payload: Result<Json<CardConfirmRequest>, JsonRejection>,
) -> WebResult<Json<ApiResponse<BuyerTransitionResponse<TransitionOutcome>>>> {
    let outcome = async {
        let order_id = parse_order_id(&order_id)?;
        let request = json_body(payload)?;
        state
            .reconciler
            .confirm_card_payment(order_id, &request.provider_reference)
            .await
            .map_err(AppError::from)
    }
    .await
    .map_err(localized(locale, BuyerMessage::OrderClosed))?;
    let message = match outcome.status {
        OrderStatus::Completed => BuyerMessage::PaymentApproved,
        OrderStatus::Rejected => BuyerMessage::PaymentCanceled,
        OrderStatus::Pending | OrderStatus::PendingApproval => BuyerMessage::PaymentPending,
    };
    Ok(ApiResponse::ok(BuyerTransitionResponse {
        outcome,
        message: message.text(locale),
    }))
}
