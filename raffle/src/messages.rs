//! Buyer-facing status messages.
//!
//! Admin routes answer with machine codes; buyer routes add a sentence in
//! the request's locale, on success and on failure alike.

use crate::types::OrderStatus;
use axum::http::StatusCode;
use raffle_web::Locale;

/// Something the buyer is told after an action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuyerMessage {
    /// Tickets reserved, order created
    Reserved,
    /// Order waits for the transfer proof
    AwaitingProof,
    /// Proof received, waiting for review
    AwaitingReview,
    /// Payment page ready
    CheckoutReady,
    /// Card payment approved
    PaymentApproved,
    /// Card payment not finished yet
    PaymentPending,
    /// Card payment canceled or declined
    PaymentCanceled,
    /// Malformed or incomplete request
    InvalidRequest,
    /// Contact details do not match the order
    ContactMismatch,
    /// Unknown order or raffle
    NotFound,
    /// Wanted tickets are taken
    TicketsUnavailable,
    /// Order no longer accepts this action
    OrderClosed,
    /// Payment provider or storage did not answer
    ServiceUnavailable,
    /// Anything else
    InternalError,
}

impl BuyerMessage {
    /// Message after a transfer notice or proof upload, by resulting status.
    #[must_use]
    pub const fn for_transfer_status(status: OrderStatus) -> Self {
        match status {
            OrderStatus::PendingApproval => Self::AwaitingReview,
            _ => Self::AwaitingProof,
        }
    }

    /// Message for a failed buyer request, by HTTP status. `on_conflict`
    /// covers 409, whose meaning depends on the route.
    #[must_use]
    pub fn for_failure(status: StatusCode, on_conflict: Self) -> Self {
        match status {
            StatusCode::BAD_REQUEST => Self::InvalidRequest,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::ContactMismatch,
            StatusCode::NOT_FOUND => Self::NotFound,
            StatusCode::CONFLICT => on_conflict,
            StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => Self::ServiceUnavailable,
            _ => Self::InternalError,
        }
    }

    /// Localized text.
    #[must_use]
    pub const fn text(self, locale: Locale) -> &'static str {
        match (self, locale) {
            (Self::Reserved, Locale::Es) => "Tus boletos fueron reservados. Completa el pago para confirmarlos.",
            (Self::Reserved, Locale::En) => "Your tickets are reserved. Complete the payment to confirm them.",
            (Self::AwaitingProof, Locale::Es) => "Registramos tu transferencia. Sube el comprobante para que podamos revisarla.",
            (Self::AwaitingProof, Locale::En) => "We noted your transfer. Upload the receipt so we can review it.",
            (Self::AwaitingReview, Locale::Es) => "Recibimos tu comprobante. Lo revisaremos y te confirmaremos por correo.",
            (Self::AwaitingReview, Locale::En) => "We received your receipt. We will review it and confirm by email.",
            (Self::CheckoutReady, Locale::Es) => "Te estamos redirigiendo a la página de pago.",
            (Self::CheckoutReady, Locale::En) => "Redirecting you to the payment page.",
            (Self::PaymentApproved, Locale::Es) => "¡Pago aprobado! Tus boletos están confirmados.",
            (Self::PaymentApproved, Locale::En) => "Payment approved! Your tickets are confirmed.",
            (Self::PaymentPending, Locale::Es) => "Tu pago aún está en proceso.",
            (Self::PaymentPending, Locale::En) => "Your payment is still being processed.",
            (Self::PaymentCanceled, Locale::Es) => "El pago fue cancelado y los boletos se liberaron.",
            (Self::PaymentCanceled, Locale::En) => "The payment was canceled and the tickets were released.",
            (Self::InvalidRequest, Locale::Es) => "Revisa los datos enviados e inténtalo de nuevo.",
            (Self::InvalidRequest, Locale::En) => "Check the details you sent and try again.",
            (Self::ContactMismatch, Locale::Es) => "Los datos de contacto no coinciden con los de la orden.",
            (Self::ContactMismatch, Locale::En) => "The contact details do not match the order.",
            (Self::NotFound, Locale::Es) => "No encontramos la orden o el sorteo solicitado.",
            (Self::NotFound, Locale::En) => "We could not find that order or raffle.",
            (Self::TicketsUnavailable, Locale::Es) => "Algunos boletos ya no están disponibles. Elige otros e inténtalo de nuevo.",
            (Self::TicketsUnavailable, Locale::En) => "Some tickets are no longer available. Pick others and try again.",
            (Self::OrderClosed, Locale::Es) => "Esta orden ya no admite este cambio.",
            (Self::OrderClosed, Locale::En) => "This order no longer accepts this change.",
            (Self::ServiceUnavailable, Locale::Es) => "El servicio no responde en este momento. Inténtalo más tarde.",
            (Self::ServiceUnavailable, Locale::En) => "The service is not responding right now. Try again later.",
            (Self::InternalError, Locale::Es) => "Ocurrió un error inesperado. Inténtalo más tarde.",
            (Self::InternalError, Locale::En) => "Something went wrong. Try again later.",
        }
    }
}
