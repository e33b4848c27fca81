//! Data store gateway.
//!
//! [`DataStore`] is the only way the core touches persistent state. Every
//! method is one statement from the store's point of view: there is no
//! transaction spanning two calls, so multi-step transitions must be
//! ordered, checked and reported step by step by the caller.
//!
//! Two implementations ship with the crate:
//!
//! - [`PgStore`]: PostgreSQL via `sqlx`, schema in `migrations/`
//! - [`MemoryStore`]: mutex-guarded maps for local development and tests

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::types::{
    AuditEntry, Client, ClientId, Money, Order, OrderId, OrderStatus, Payment, PaymentMethod,
    PaymentProvider, Raffle, RaffleId, RaffleProgress, SoldOrder, TicketNumber, TicketStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use uuid::Uuid;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The write lost against a concurrent writer or a uniqueness rule.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The backend cannot answer this query shape.
    #[error("unsupported query: {0}")]
    Unsupported(&'static str),

    /// The backend failed (connection, statement, pool).
    #[error("backend error: {0}")]
    Backend(String),

    /// A stored row could not be mapped to a domain type.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Which tickets an intake wants.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selection {
    /// Any `n` available numbers; the store picks them.
    Count(u32),
    /// Exactly these numbers.
    Numbers(Vec<TicketNumber>),
}

impl Selection {
    /// How many tickets the selection asks for.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Count(n) => usize::try_from(*n).unwrap_or(usize::MAX),
            Self::Numbers(numbers) => numbers.len(),
        }
    }

    /// Whether nothing is requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// All-or-nothing ticket reservation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReservationRequest {
    /// Raffle
    pub raffle_id: RaffleId,
    /// New owner
    pub client_id: ClientId,
    /// Wanted tickets
    pub selection: Selection,
    /// End of the hold
    pub reserved_until: DateTime<Utc>,
}

/// Partial update of an order row. `None` leaves a column untouched;
/// `Some(None)` clears a nullable column.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OrderPatch {
    /// New status
    pub status: Option<OrderStatus>,
    /// New payment method
    pub payment_method: Option<PaymentMethod>,
    /// New rejection reason
    pub rejection_reason: Option<Option<String>>,
    /// New transfer proof path
    pub transfer_proof_path: Option<Option<String>>,
    /// Only update when the stored status is one of these; empty means
    /// unguarded. A zero row count then means another writer moved the
    /// order first.
    pub only_from: &'static [OrderStatus],
}

impl OrderPatch {
    /// Set the status.
    #[must_use]
    pub const fn status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the payment method.
    #[must_use]
    pub const fn payment_method(mut self, method: PaymentMethod) -> Self {
        self.payment_method = Some(method);
        self
    }

    /// Set or clear the rejection reason.
    #[must_use]
    pub fn rejection_reason(mut self, reason: Option<String>) -> Self {
        self.rejection_reason = Some(reason);
        self
    }

    /// Set the transfer proof path.
    #[must_use]
    pub fn transfer_proof_path(mut self, path: String) -> Self {
        self.transfer_proof_path = Some(Some(path));
        self
    }

    /// Guard the update on the stored status.
    #[must_use]
    pub const fn only_from(mut self, statuses: &'static [OrderStatus]) -> Self {
        self.only_from = statuses;
        self
    }

    /// Guard the update to orders nobody has settled yet.
    #[must_use]
    pub const fn only_open(self) -> Self {
        self.only_from(&OrderStatus::OPEN)
    }

    /// Whether the guard lets the update through for an order in `status`.
    #[must_use]
    pub fn admits(&self, status: OrderStatus) -> bool {
        self.only_from.is_empty() || self.only_from.contains(&status)
    }

    /// Apply the patch to an in-memory order.
    pub fn apply_to(&self, order: &mut Order) {
        if let Some(status) = self.status {
            order.status = status;
        }
        if let Some(method) = self.payment_method {
            order.payment_method = method;
        }
        if let Some(reason) = &self.rejection_reason {
            order.rejection_reason.clone_from(reason);
        }
        if let Some(path) = &self.transfer_proof_path {
            order.transfer_proof_path.clone_from(path);
        }
    }
}

/// Filter for order listings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderFilter {
    /// Payment method
    pub payment_method: Option<PaymentMethod>,
    /// Status
    pub status: Option<OrderStatus>,
    /// Maximum rows, newest first
    pub limit: u32,
}

/// Remote relational store used by the reconciliation core.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Load one order.
    async fn find_order(&self, id: OrderId) -> StoreResult<Option<Order>>;

    /// List orders, newest first.
    async fn list_orders(&self, filter: &OrderFilter) -> StoreResult<Vec<Order>>;

    /// Insert a new order.
    async fn insert_order(&self, order: &Order) -> StoreResult<()>;

    /// Update one order; returns the number of rows changed.
    async fn update_order(&self, id: OrderId, patch: &OrderPatch) -> StoreResult<u64>;

    /// Load a buyer.
    async fn find_client(&self, id: ClientId) -> StoreResult<Option<Client>>;

    /// Load a raffle.
    async fn find_raffle(&self, id: RaffleId) -> StoreResult<Option<Raffle>>;

    /// Reserve tickets atomically: either every requested ticket moves from
    /// `available` to `reserved` for the client, or none does and
    /// [`StoreError::Conflict`] is returned.
    async fn reserve_tickets(&self, request: &ReservationRequest) -> StoreResult<Vec<TicketNumber>>;

    /// Undo a reservation that never became an order: `reserved` tickets of
    /// the client go back to `available`.
    async fn release_reservation(
        &self,
        raffle_id: RaffleId,
        client_id: ClientId,
        numbers: &[TicketNumber],
    ) -> StoreResult<u64>;

    /// Count the listed tickets currently owned by the client, optionally
    /// only those in `status`.
    async fn count_owned_tickets(
        &self,
        raffle_id: RaffleId,
        client_id: ClientId,
        numbers: &[TicketNumber],
        status: Option<TicketStatus>,
    ) -> StoreResult<u64>;

    /// Mark the listed tickets owned by the client as `paid`, clearing the
    /// reservation expiry; returns the number of rows changed.
    async fn mark_tickets_paid(
        &self,
        raffle_id: RaffleId,
        client_id: ClientId,
        numbers: &[TicketNumber],
    ) -> StoreResult<u64>;

    /// Put the listed tickets owned by the client back to `available`,
    /// clearing owner and expiry; returns the number of rows changed.
    async fn release_tickets(
        &self,
        raffle_id: RaffleId,
        client_id: ClientId,
        numbers: &[TicketNumber],
    ) -> StoreResult<u64>;

    /// Append a payment record. A second approved payment for the same
    /// order is rejected with [`StoreError::Conflict`].
    async fn insert_payment(&self, payment: &Payment) -> StoreResult<()>;

    /// All payment records of an order.
    async fn payments_for_order(&self, order_id: OrderId) -> StoreResult<Vec<Payment>>;

    /// Append an audit-log entry.
    async fn append_audit(&self, entry: &AuditEntry) -> StoreResult<()>;

    /// Whether the user has the admin role flag.
    async fn is_admin(&self, user_id: Uuid) -> StoreResult<bool>;

    /// Sold/total counts per raffle.
    async fn raffle_progress(&self) -> StoreResult<Vec<RaffleProgress>>;

    /// Count tickets in a status across all raffles.
    async fn count_tickets(&self, status: TicketStatus) -> StoreResult<u64>;

    /// Provider and amount of every approved payment.
    async fn approved_payment_amounts(&self) -> StoreResult<Vec<(PaymentProvider, Money)>>;

    /// Count orders by payment method and status.
    async fn count_orders(&self, method: PaymentMethod, status: OrderStatus) -> StoreResult<u64>;

    /// Completed orders of the raffles that have at least one approved
    /// payment, resolved with a join. Backends without join support answer
    /// [`StoreError::Unsupported`].
    async fn sold_orders_joined(&self, raffle_ids: &[RaffleId]) -> StoreResult<Vec<SoldOrder>>;

    /// Completed orders of the raffles, regardless of payments.
    async fn completed_orders(&self, raffle_ids: &[RaffleId]) -> StoreResult<Vec<SoldOrder>>;

    /// Which of the orders have at least one approved payment.
    async fn approved_payment_order_ids(&self, order_ids: &[OrderId]) -> StoreResult<HashSet<OrderId>>;

    /// Cheap connectivity check.
    async fn ping(&self) -> StoreResult<()>;
}
