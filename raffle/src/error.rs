//! Error taxonomy of the reconciliation core.
//!
//! Every operation returns [`ReconcileError`] and the HTTP layer maps each
//! variant onto one status code. [`ReconcileError::PartialFailure`] names the
//! [`Step`] that failed so an operator can finish the transition by hand.

use crate::store::StoreError;
use raffle_web::AppError;
use std::fmt;

/// Result type for core operations.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// One write of a multi-step transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Step {
    /// Undo a reservation after the order write failed
    ReleaseReservation,
    /// Update the order status
    UpdateOrder,
    /// Record the approved payment
    InsertPayment,
    /// Mark the order's tickets `paid`
    MarkTicketsPaid,
    /// Put the order's tickets back to `available`
    ReleaseTickets,
    /// Append the admin audit entry
    AppendAudit,
}

impl Step {
    /// Machine-readable step name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ReleaseReservation => "release_reservation",
            Self::UpdateOrder => "update_order",
            Self::InsertPayment => "insert_payment",
            Self::MarkTicketsPaid => "mark_tickets_paid",
            Self::ReleaseTickets => "release_tickets",
            Self::AppendAudit => "append_audit",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failures of the reconciliation core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    /// Malformed or missing input; the store was not touched.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced record does not exist.
    #[error("{resource} not found: {id}")]
    NotFound {
        /// Kind of record
        resource: &'static str,
        /// Identifier looked up
        id: String,
    },

    /// Ownership or capability mismatch.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The current state does not allow the requested transition.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A downstream service did not answer.
    #[error("unavailable: {message}")]
    Unavailable {
        /// What failed
        message: String,
        /// Whether the call ran into its time budget
        timed_out: bool,
    },

    /// A transition stopped after some of its writes were applied.
    #[error("partial failure at step {step}: {message}")]
    PartialFailure {
        /// Step that failed
        step: Step,
        /// Why it failed
        message: String,
    },

    /// A store call failed and left nothing half-written.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl ReconcileError {
    /// `NotFound` for an order.
    #[must_use]
    pub fn order_not_found(id: impl fmt::Display) -> Self {
        Self::NotFound {
            resource: "order",
            id: id.to_string(),
        }
    }

    /// `PartialFailure` for a failed step.
    #[must_use]
    pub fn partial(step: Step, message: impl Into<String>) -> Self {
        Self::PartialFailure {
            step,
            message: message.into(),
        }
    }

    /// Short machine code used in logs and metrics labels.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::Conflict(_) => "conflict",
            Self::Unavailable { .. } => "unavailable",
            Self::PartialFailure { .. } => "partial_failure",
            Self::Store(_) => "store",
        }
    }
}

impl From<ReconcileError> for AppError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::Validation(msg) => Self::bad_request(msg),
            ReconcileError::NotFound { resource, id } => Self::not_found(resource, id),
            ReconcileError::Forbidden(msg) => Self::forbidden(msg),
            ReconcileError::Conflict(msg) => Self::conflict(msg),
            ReconcileError::Unavailable { message, timed_out: true } => Self::gateway_timeout(message),
            ReconcileError::Unavailable { message, timed_out: false } => Self::unavailable(message),
            ReconcileError::PartialFailure { step, message } => {
                Self::partial_failure(step.as_str(), message)
            }
            ReconcileError::Store(source) => {
                Self::internal("Store error").with_source(anyhow::Error::new(source))
            }
        }
    }
}
