//! Ticket reservation and payment reconciliation.
//!
//! [`Reconciler`] runs every order transition: it reads the facts a
//! transition depends on, asks [`crate::lifecycle`] for a plan and executes
//! the plan one store call at a time. The store offers no transaction across
//! calls, so each write is checked as it happens and a failure after the
//! first write is reported as [`ReconcileError::PartialFailure`] naming the
//! step. Completion is resumable: calling it again after a partial failure
//! skips the writes already applied and never records a second payment.

use crate::auth::AdminIdentity;
use crate::config::Config;
use crate::contact::{matches_contact, ContactClaim};
use crate::environment::Clock;
use crate::error::{ReconcileError, ReconcileResult, Step};
use crate::lifecycle::{self, CompletionFacts, CompletionPlan, RejectionPlan};
use crate::metrics;
use crate::notify::Notifier;
use crate::payment_gateway::{ChargeRequest, ChargeStatus, GatewayError, PaymentGateway};
use crate::storage::{sign_optional, ProofStorage};
use crate::store::{DataStore, OrderFilter, OrderPatch, ReservationRequest, Selection, StoreError};
use crate::types::{
    AuditAction, AuditEntry, Client, ClientId, Order, OrderId, OrderStatus, Payment, PaymentId,
    PaymentMethod, PaymentProvider, PaymentStatus, RaffleId, TicketStatus,
};
use chrono::TimeDelta;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Reason stored when the card provider cancels without one.
pub const CANCELED_PAYMENT_REASON: &str = "Pago cancelado";

/// Gateways the reconciler works through.
#[derive(Clone)]
pub struct ReconcileEnvironment {
    /// Relational store
    pub store: Arc<dyn DataStore>,
    /// Card payment provider
    pub payments: Arc<dyn PaymentGateway>,
    /// Transfer-proof storage
    pub storage: Arc<dyn ProofStorage>,
    /// Confirmation dispatch
    pub notifier: Arc<dyn Notifier>,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

/// Tunables of the reconciler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconcilerSettings {
    /// How long reserved tickets are held
    pub reservation_ttl: TimeDelta,
    /// Upper bound of tickets in one order
    pub max_tickets_per_order: u32,
    /// Upper bound of rows in admin listings
    pub list_limit: u32,
    /// Lifetime of signed proof URLs
    pub signed_url_ttl: Duration,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            reservation_ttl: TimeDelta::minutes(30),
            max_tickets_per_order: 100,
            list_limit: 200,
            signed_url_ttl: Duration::from_secs(600),
        }
    }
}

impl ReconcilerSettings {
    /// Settings from configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let defaults = Self::default();
        Self {
            reservation_ttl: TimeDelta::try_minutes(config.reservations.ttl_minutes)
                .unwrap_or(defaults.reservation_ttl),
            max_tickets_per_order: config.reservations.max_tickets_per_order,
            list_limit: config.reservations.list_limit,
            signed_url_ttl: Duration::from_secs(config.storage.signed_url_ttl),
        }
    }
}

/// Intake request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReserveRequest {
    /// Raffle to buy from
    pub raffle_id: RaffleId,
    /// Buyer
    pub client_id: ClientId,
    /// Wanted tickets
    pub selection: Selection,
    /// Chosen payment method
    pub payment_method: PaymentMethod,
    /// Proof object uploaded before ordering, transfer only
    pub transfer_proof_path: Option<String>,
}

/// Result of a lifecycle transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TransitionOutcome {
    /// Order
    pub order_id: OrderId,
    /// Status after the call
    pub status: OrderStatus,
    /// Whether anything was written
    pub changed: bool,
    /// Payment recorded by this call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<PaymentId>,
    /// Whether the confirmation went out, when one was due
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notified: Option<bool>,
}

impl TransitionOutcome {
    fn unchanged(order: &Order) -> Self {
        Self {
            order_id: order.id,
            status: order.status,
            changed: false,
            payment_id: None,
            notified: None,
        }
    }

    const fn changed(order_id: OrderId, status: OrderStatus) -> Self {
        Self {
            order_id,
            status,
            changed: true,
            payment_id: None,
            notified: None,
        }
    }
}

/// A prepared card charge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CheckoutStarted {
    /// Order
    pub order_id: OrderId,
    /// Provider-side payment id, needed to confirm
    pub provider_reference: String,
    /// Hosted payment page
    pub payment_url: String,
}

/// An order as shown in admin listings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OrderView {
    /// Order row
    #[serde(flatten)]
    pub order: Order,
    /// Short-lived link to the transfer proof
    pub proof_url: Option<String>,
}

/// One order with everything an admin reviews.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OrderDetail {
    /// Order row
    #[serde(flatten)]
    pub order: Order,
    /// Short-lived link to the transfer proof
    pub proof_url: Option<String>,
    /// Buyer
    pub client: Option<Client>,
    /// Payment records
    pub payments: Vec<Payment>,
}

struct PaymentDraft {
    provider: PaymentProvider,
    provider_reference: Option<String>,
    proof_url: Option<String>,
}

/// Runs order lifecycle transitions against the gateways.
#[derive(Clone)]
pub struct Reconciler {
    env: ReconcileEnvironment,
    settings: ReconcilerSettings,
}

impl Reconciler {
    /// Creates a reconciler.
    #[must_use]
    pub const fn new(env: ReconcileEnvironment, settings: ReconcilerSettings) -> Self {
        Self { env, settings }
    }

    /// The data store, for read-only aggregations and health checks.
    #[must_use]
    pub fn store(&self) -> &dyn DataStore {
        &*self.env.store
    }

    /// Active settings.
    #[must_use]
    pub const fn settings(&self) -> &ReconcilerSettings {
        &self.settings
    }

    // ------------------------------------------------------------------
    // Buyer operations
    // ------------------------------------------------------------------

    /// Reserve tickets and create the order.
    ///
    /// Reservation is all-or-nothing. If the order row cannot be written the
    /// reservation is released again.
    ///
    /// # Errors
    ///
    /// `Validation` for a bad selection, `NotFound` for an unknown raffle or
    /// client, `Conflict` for an inactive raffle or taken numbers.
    #[tracing::instrument(skip_all, fields(raffle_id = %request.raffle_id, client_id = %request.client_id))]
    pub async fn reserve(&self, request: ReserveRequest) -> ReconcileResult<Order> {
        observed("reserve", self.reserve_inner(request).await)
    }

    async fn reserve_inner(&self, request: ReserveRequest) -> ReconcileResult<Order> {
        lifecycle::validate_selection(&request.selection, self.settings.max_tickets_per_order)?;
        let proof = request
            .transfer_proof_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);
        if proof.is_some() && request.payment_method != PaymentMethod::Transfer {
            return Err(ReconcileError::Validation(
                "a transfer proof requires the transfer payment method".to_string(),
            ));
        }

        let store = &self.env.store;
        let raffle = store
            .find_raffle(request.raffle_id)
            .await?
            .ok_or_else(|| ReconcileError::NotFound {
                resource: "raffle",
                id: request.raffle_id.to_string(),
            })?;
        if !raffle.active {
            return Err(ReconcileError::Conflict(format!("raffle {} is not on sale", raffle.id)));
        }
        store
            .find_client(request.client_id)
            .await?
            .ok_or_else(|| ReconcileError::NotFound {
                resource: "client",
                id: request.client_id.to_string(),
            })?;

        let quantity = u64::try_from(request.selection.len()).unwrap_or(u64::MAX);
        let total = raffle
            .ticket_price
            .checked_multiply(quantity)
            .ok_or_else(|| ReconcileError::Validation("order total is too large".to_string()))?;

        let now = self.env.clock.now();
        let reservation = ReservationRequest {
            raffle_id: request.raffle_id,
            client_id: request.client_id,
            selection: request.selection,
            reserved_until: now + self.settings.reservation_ttl,
        };
        let numbers = store.reserve_tickets(&reservation).await.map_err(|err| match err {
            StoreError::Conflict(msg) => ReconcileError::Conflict(format!("tickets not available: {msg}")),
            other => ReconcileError::Store(other),
        })?;

        let status = lifecycle::initial_status(request.payment_method, proof.is_some());
        let order = Order {
            id: OrderId::new(),
            raffle_id: request.raffle_id,
            client_id: request.client_id,
            numbers,
            total,
            payment_method: request.payment_method,
            status,
            rejection_reason: None,
            transfer_proof_path: proof,
            created_at: now,
        };

        if let Err(insert_err) = store.insert_order(&order).await {
            return Err(self.undo_reservation(&order, insert_err.into()).await);
        }

        metrics::record_order_created(status);
        tracing::info!(
            order_id = %order.id,
            tickets = order.numbers.len(),
            total = %order.total,
            status = %order.status,
            "Order created"
        );
        Ok(order)
    }

    /// Give back tickets reserved for `order` after a later write failed with
    /// `cause`. A failed release turns `cause` into a partial failure.
    async fn undo_reservation(&self, order: &Order, cause: ReconcileError) -> ReconcileError {
        let expected = lifecycle::ticket_count(order);
        match self
            .env
            .store
            .release_reservation(order.raffle_id, order.client_id, &order.numbers)
            .await
        {
            Ok(rows) if rows == expected => cause,
            Ok(rows) => ReconcileError::partial(
                Step::ReleaseReservation,
                format!("{cause}; released {rows} of {expected} reserved tickets"),
            ),
            Err(release_err) => ReconcileError::partial(
                Step::ReleaseReservation,
                format!("{cause}; releasing reserved tickets failed: {release_err}"),
            ),
        }
    }

    /// Buyer reports a bank transfer for an order.
    ///
    /// A rejected order is reopened if all of its numbers can be reserved
    /// for the buyer again.
    ///
    /// # Errors
    ///
    /// `Validation` without email and phone, `NotFound` for an unknown
    /// order, `Forbidden` when the contact does not match, `Conflict` for a
    /// completed order or a rejected one whose numbers were taken.
    #[tracing::instrument(skip_all, fields(order_id = %order_id))]
    pub async fn notify_transfer(
        &self,
        order_id: OrderId,
        claim: &ContactClaim,
    ) -> ReconcileResult<TransitionOutcome> {
        observed("transfer_notify", self.notify_transfer_inner(order_id, claim).await)
    }

    async fn notify_transfer_inner(
        &self,
        order_id: OrderId,
        claim: &ContactClaim,
    ) -> ReconcileResult<TransitionOutcome> {
        if claim.is_empty() {
            return Err(ReconcileError::Validation("email or phone is required".to_string()));
        }
        let order = self.load_order(order_id).await?;
        self.check_contact(&order, claim).await?;

        let patch = lifecycle::plan_transfer_notice(&order, claim)?;
        self.apply_buyer_patch(&order, &patch).await
    }

    /// Buyer records the object path of an uploaded transfer proof.
    ///
    /// # Errors
    ///
    /// Same as [`Self::notify_transfer`], plus `Validation` for an empty
    /// path.
    #[tracing::instrument(skip_all, fields(order_id = %order_id))]
    pub async fn attach_transfer_proof(
        &self,
        order_id: OrderId,
        claim: &ContactClaim,
        proof_path: &str,
    ) -> ReconcileResult<TransitionOutcome> {
        observed(
            "transfer_proof",
            self.attach_transfer_proof_inner(order_id, claim, proof_path).await,
        )
    }

    async fn attach_transfer_proof_inner(
        &self,
        order_id: OrderId,
        claim: &ContactClaim,
        proof_path: &str,
    ) -> ReconcileResult<TransitionOutcome> {
        if proof_path.trim().is_empty() || claim.is_empty() {
            return Err(ReconcileError::Validation(
                "proof path and email or phone are required".to_string(),
            ));
        }
        let order = self.load_order(order_id).await?;
        self.check_contact(&order, claim).await?;

        let patch = lifecycle::plan_proof_attachment(&order, claim, proof_path)?;
        self.apply_buyer_patch(&order, &patch).await
    }

    async fn check_contact(&self, order: &Order, claim: &ContactClaim) -> ReconcileResult<()> {
        let client = self
            .env
            .store
            .find_client(order.client_id)
            .await?
            .ok_or_else(|| ReconcileError::NotFound {
                resource: "client",
                id: order.client_id.to_string(),
            })?;

        if matches_contact(claim, &client) {
            Ok(())
        } else {
            tracing::warn!(order_id = %order.id, "Contact details do not match the order");
            Err(ReconcileError::Forbidden(
                "contact details do not match the order".to_string(),
            ))
        }
    }

    /// Write a buyer update. A rejected order gets its tickets reserved
    /// again before it is reopened, and loses them again if the reopen
    /// does not go through.
    async fn apply_buyer_patch(&self, order: &Order, patch: &OrderPatch) -> ReconcileResult<TransitionOutcome> {
        let reopening = lifecycle::reopens(order);
        if reopening {
            self.hold_tickets_again(order).await?;
        }

        let mut after = order.clone();
        patch.apply_to(&mut after);

        let failure = match self.env.store.update_order(order.id, patch).await {
            Ok(0) => Some(ReconcileError::Conflict(format!(
                "order {} changed status concurrently",
                order.id
            ))),
            Ok(_) => None,
            Err(err) => Some(ReconcileError::Store(err)),
        };
        if let Some(err) = failure {
            return Err(if reopening { self.undo_reservation(order, err).await } else { err });
        }

        tracing::info!(order_id = %order.id, from = %order.status, to = %after.status, "Transfer order updated by buyer");
        Ok(TransitionOutcome {
            order_id: order.id,
            status: after.status,
            changed: after != *order,
            payment_id: None,
            notified: None,
        })
    }

    async fn hold_tickets_again(&self, order: &Order) -> ReconcileResult<()> {
        let request = ReservationRequest {
            raffle_id: order.raffle_id,
            client_id: order.client_id,
            selection: Selection::Numbers(order.numbers.clone()),
            reserved_until: self.env.clock.now() + self.settings.reservation_ttl,
        };
        self.env
            .store
            .reserve_tickets(&request)
            .await
            .map_err(|err| match err {
                StoreError::Conflict(msg) => ReconcileError::Conflict(format!(
                    "tickets of rejected order {} are no longer available: {msg}",
                    order.id
                )),
                other => ReconcileError::Store(other),
            })?;
        tracing::info!(order_id = %order.id, "Tickets of rejected order reserved again");
        Ok(())
    }

    /// Prepare a hosted card payment for a pending card order.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Conflict` for a non-card or non-pending order,
    /// `Unavailable` when the provider does not answer.
    #[tracing::instrument(skip_all, fields(order_id = %order_id))]
    pub async fn start_card_checkout(&self, order_id: OrderId) -> ReconcileResult<CheckoutStarted> {
        observed("card_checkout", self.start_card_checkout_inner(order_id).await)
    }

    async fn start_card_checkout_inner(&self, order_id: OrderId) -> ReconcileResult<CheckoutStarted> {
        let order = self.load_order(order_id).await?;
        lifecycle::check_card_checkout(&order)?;

        let request = ChargeRequest {
            order_id: order.id,
            amount: order.total,
            reference: format!("Orden {}", order.id),
        };
        let created = provider_call(self.env.payments.create_charge(&request).await)?;

        Ok(CheckoutStarted {
            order_id: order.id,
            provider_reference: created.provider_reference,
            payment_url: created.payment_url,
        })
    }

    /// Settle a card order from the provider's answer.
    ///
    /// Approved charges complete the order, canceled ones reject it and
    /// release the tickets, pending ones change nothing.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Conflict` for a non-card order, `Unavailable` when the
    /// provider does not answer, `PartialFailure` when a write fails midway.
    #[tracing::instrument(skip_all, fields(order_id = %order_id))]
    pub async fn confirm_card_payment(
        &self,
        order_id: OrderId,
        provider_reference: &str,
    ) -> ReconcileResult<TransitionOutcome> {
        observed(
            "card_confirm",
            self.confirm_card_payment_inner(order_id, provider_reference).await,
        )
    }

    async fn confirm_card_payment_inner(
        &self,
        order_id: OrderId,
        provider_reference: &str,
    ) -> ReconcileResult<TransitionOutcome> {
        let provider_reference = provider_reference.trim();
        if provider_reference.is_empty() {
            return Err(ReconcileError::Validation("provider reference is required".to_string()));
        }

        let order = self.load_order(order_id).await?;
        if order.payment_method == PaymentMethod::Card && order.status == OrderStatus::Rejected {
            return Ok(TransitionOutcome::unchanged(&order));
        }

        let facts = self.completion_facts(&order).await?;
        let CompletionPlan::Execute {
            complete_order,
            insert_payment,
        } = lifecycle::plan_completion(&order, PaymentMethod::Card, facts)?
        else {
            return Ok(TransitionOutcome::unchanged(&order));
        };

        if !insert_payment {
            self.execute_completion(&order, complete_order, None).await?;
            return Ok(self.completed(order.id, None).await);
        }

        match provider_call(self.env.payments.query_status(provider_reference, order.id).await)? {
            ChargeStatus::Approved { transaction_id } => {
                let draft = PaymentDraft {
                    provider: PaymentProvider::PayPhone,
                    provider_reference: Some(transaction_id.unwrap_or_else(|| provider_reference.to_string())),
                    proof_url: None,
                };
                let payment_id = self.execute_completion(&order, complete_order, Some(draft)).await?;
                Ok(self.completed(order.id, payment_id).await)
            }
            ChargeStatus::Pending => Ok(TransitionOutcome::unchanged(&order)),
            ChargeStatus::Canceled { reason } => {
                let reason = Some(reason.trim())
                    .filter(|r| !r.is_empty())
                    .unwrap_or(CANCELED_PAYMENT_REASON);
                self.execute_rejection(&order, reason).await?;
                Ok(TransitionOutcome::changed(order.id, OrderStatus::Rejected))
            }
        }
    }

    // ------------------------------------------------------------------
    // Admin operations
    // ------------------------------------------------------------------

    /// Approve a transfer order.
    ///
    /// Steps, in order: order `completed`, approved payment recorded, tickets
    /// `paid`, audit entry. A completed and paid order is a no-op.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Conflict` for a non-transfer or rejected order or for
    /// tickets no longer owned by the buyer, `PartialFailure` naming the
    /// failed step.
    #[tracing::instrument(skip_all, fields(order_id = %order_id, admin_id = %admin.admin_id))]
    pub async fn approve_transfer(
        &self,
        order_id: OrderId,
        admin: &AdminIdentity,
    ) -> ReconcileResult<TransitionOutcome> {
        observed("transfer_approve", self.approve_transfer_inner(order_id, admin).await)
    }

    async fn approve_transfer_inner(
        &self,
        order_id: OrderId,
        admin: &AdminIdentity,
    ) -> ReconcileResult<TransitionOutcome> {
        let order = self.load_order(order_id).await?;
        let facts = self.completion_facts(&order).await?;

        let CompletionPlan::Execute {
            complete_order,
            insert_payment,
        } = lifecycle::plan_completion(&order, PaymentMethod::Transfer, facts)?
        else {
            tracing::info!(order_id = %order.id, "Transfer already approved");
            return Ok(TransitionOutcome::unchanged(&order));
        };

        let draft = insert_payment.then(|| PaymentDraft {
            provider: PaymentProvider::Transfer,
            provider_reference: None,
            proof_url: order.transfer_proof_path.clone(),
        });
        let payment_id = self.execute_completion(&order, complete_order, draft).await?;

        self.audit(
            admin,
            AuditAction::TransferApprove,
            &order,
            json!({
                "total": order.total,
                "numbers": order.numbers,
                "resumed": !complete_order,
            }),
        )
        .await?;

        Ok(self.completed(order.id, payment_id).await)
    }

    /// Reject a transfer order and release its tickets.
    ///
    /// A blank reason is replaced by
    /// [`lifecycle::DEFAULT_REJECTION_REASON`].
    ///
    /// # Errors
    ///
    /// `NotFound`, `Conflict` for a completed or non-transfer order,
    /// `PartialFailure` when the tickets could not be released after the
    /// order was marked rejected.
    #[tracing::instrument(skip_all, fields(order_id = %order_id, admin_id = %admin.admin_id))]
    pub async fn reject_transfer(
        &self,
        order_id: OrderId,
        reason: Option<&str>,
        admin: &AdminIdentity,
    ) -> ReconcileResult<TransitionOutcome> {
        observed("transfer_reject", self.reject_transfer_inner(order_id, reason, admin).await)
    }

    async fn reject_transfer_inner(
        &self,
        order_id: OrderId,
        reason: Option<&str>,
        admin: &AdminIdentity,
    ) -> ReconcileResult<TransitionOutcome> {
        let order = self.load_order(order_id).await?;
        let owned = self
            .env
            .store
            .count_owned_tickets(order.raffle_id, order.client_id, &order.numbers, None)
            .await?;

        let details = match lifecycle::plan_rejection(&order, PaymentMethod::Transfer, reason, owned)? {
            RejectionPlan::AlreadyRejected => return Ok(TransitionOutcome::unchanged(&order)),
            RejectionPlan::ReleaseLeftovers { held } => {
                self.release_order_tickets(&order, held).await?;
                json!({ "reason": order.rejection_reason, "resumed": true })
            }
            RejectionPlan::Execute { reason } => {
                self.execute_rejection(&order, &reason).await?;
                json!({ "reason": reason, "numbers": order.numbers })
            }
        };

        self.audit(admin, AuditAction::TransferReject, &order, details).await?;
        Ok(TransitionOutcome::changed(order.id, OrderStatus::Rejected))
    }

    /// Send the confirmation of a completed order again.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Conflict` for an order that is not completed,
    /// `Unavailable` when the dispatch fails, `PartialFailure` when the
    /// audit entry cannot be written after sending.
    #[tracing::instrument(skip_all, fields(order_id = %order_id, admin_id = %admin.admin_id))]
    pub async fn resend_invoice(
        &self,
        order_id: OrderId,
        admin: &AdminIdentity,
    ) -> ReconcileResult<TransitionOutcome> {
        observed("invoice_resend", self.resend_invoice_inner(order_id, admin).await)
    }

    async fn resend_invoice_inner(
        &self,
        order_id: OrderId,
        admin: &AdminIdentity,
    ) -> ReconcileResult<TransitionOutcome> {
        let order = self.load_order(order_id).await?;
        lifecycle::check_invoice_resend(&order)?;

        self.env
            .notifier
            .send_order_confirmation(order.id)
            .await
            .map_err(|e| ReconcileError::Unavailable {
                message: e.to_string(),
                timed_out: false,
            })?;

        self.audit(admin, AuditAction::InvoiceResend, &order, json!({})).await?;
        Ok(TransitionOutcome {
            notified: Some(true),
            ..TransitionOutcome::unchanged(&order)
        })
    }

    /// Transfer orders in `status`, newest first, with signed proof links.
    ///
    /// # Errors
    ///
    /// `Store` when the listing cannot be read.
    pub async fn list_transfer_orders(&self, status: OrderStatus) -> ReconcileResult<Vec<OrderView>> {
        let filter = OrderFilter {
            payment_method: Some(PaymentMethod::Transfer),
            status: Some(status),
            limit: self.settings.list_limit,
        };
        let orders = self.env.store.list_orders(&filter).await?;

        let signed = futures::future::join_all(
            orders
                .iter()
                .map(|order| self.sign_proof(order.transfer_proof_path.as_deref())),
        )
        .await;

        Ok(orders
            .into_iter()
            .zip(signed)
            .map(|(order, proof_url)| OrderView { order, proof_url })
            .collect())
    }

    /// One order with its buyer, payments and signed proof link.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown order.
    pub async fn order_detail(&self, order_id: OrderId) -> ReconcileResult<OrderDetail> {
        let order = self.load_order(order_id).await?;
        let client = self.env.store.find_client(order.client_id).await?;
        let payments = self.env.store.payments_for_order(order.id).await?;
        let proof_url = self.sign_proof(order.transfer_proof_path.as_deref()).await;

        Ok(OrderDetail {
            order,
            proof_url,
            client,
            payments,
        })
    }

    // ------------------------------------------------------------------
    // Steps
    // ------------------------------------------------------------------

    async fn load_order(&self, order_id: OrderId) -> ReconcileResult<Order> {
        self.env
            .store
            .find_order(order_id)
            .await?
            .ok_or_else(|| ReconcileError::order_not_found(order_id))
    }

    async fn completion_facts(&self, order: &Order) -> ReconcileResult<CompletionFacts> {
        let store = &self.env.store;
        let payments = store.payments_for_order(order.id).await?;
        let owned_tickets = store
            .count_owned_tickets(order.raffle_id, order.client_id, &order.numbers, None)
            .await?;
        let paid_tickets = store
            .count_owned_tickets(order.raffle_id, order.client_id, &order.numbers, Some(TicketStatus::Paid))
            .await?;

        Ok(CompletionFacts {
            has_approved_payment: payments.iter().any(|p| p.status == PaymentStatus::Approved),
            owned_tickets,
            paid_tickets,
        })
    }

    /// Steps 1-3 of a completion: order status, payment, tickets.
    async fn execute_completion(
        &self,
        order: &Order,
        complete_order: bool,
        payment: Option<PaymentDraft>,
    ) -> ReconcileResult<Option<PaymentId>> {
        let store = &self.env.store;

        if complete_order {
            let patch = OrderPatch::default()
                .status(OrderStatus::Completed)
                .rejection_reason(None)
                .only_open();
            let rows = store
                .update_order(order.id, &patch)
                .await
                .map_err(|e| ReconcileError::partial(Step::UpdateOrder, e.to_string()))?;
            if rows == 0 {
                return Err(ReconcileError::Conflict(format!(
                    "order {} changed status concurrently",
                    order.id
                )));
            }
        }

        let payment_id = match payment {
            Some(draft) => {
                let payment = Payment {
                    id: PaymentId::new(),
                    order_id: order.id,
                    provider: draft.provider,
                    provider_reference: draft.provider_reference,
                    amount: order.total,
                    status: PaymentStatus::Approved,
                    proof_url: draft.proof_url,
                    created_at: self.env.clock.now(),
                };
                match store.insert_payment(&payment).await {
                    Ok(()) => Some(payment.id),
                    Err(StoreError::Conflict(msg)) => {
                        return Err(ReconcileError::Conflict(format!(
                            "order {} already has an approved payment: {msg}",
                            order.id
                        )));
                    }
                    Err(e) => return Err(ReconcileError::partial(Step::InsertPayment, e.to_string())),
                }
            }
            None => None,
        };

        let rows = store
            .mark_tickets_paid(order.raffle_id, order.client_id, &order.numbers)
            .await
            .map_err(|e| ReconcileError::partial(Step::MarkTicketsPaid, e.to_string()))?;
        lifecycle::check_ticket_rows(Step::MarkTicketsPaid, lifecycle::ticket_count(order), rows)?;

        tracing::info!(order_id = %order.id, ?payment_id, "Order completed");
        Ok(payment_id)
    }

    /// Order `rejected` with `reason`, then tickets released.
    async fn execute_rejection(&self, order: &Order, reason: &str) -> ReconcileResult<()> {
        let patch = OrderPatch::default()
            .status(OrderStatus::Rejected)
            .rejection_reason(Some(reason.to_string()))
            .only_open();
        let rows = self
            .env
            .store
            .update_order(order.id, &patch)
            .await
            .map_err(|e| ReconcileError::partial(Step::UpdateOrder, e.to_string()))?;
        if rows == 0 {
            return Err(ReconcileError::Conflict(format!(
                "order {} changed status concurrently",
                order.id
            )));
        }

        self.release_order_tickets(order, lifecycle::ticket_count(order)).await?;
        tracing::info!(order_id = %order.id, reason, "Order rejected");
        Ok(())
    }

    async fn release_order_tickets(&self, order: &Order, expected: u64) -> ReconcileResult<()> {
        let rows = self
            .env
            .store
            .release_tickets(order.raffle_id, order.client_id, &order.numbers)
            .await
            .map_err(|e| ReconcileError::partial(Step::ReleaseTickets, e.to_string()))?;
        lifecycle::check_ticket_rows(Step::ReleaseTickets, expected, rows)
    }

    async fn audit(
        &self,
        admin: &AdminIdentity,
        action: AuditAction,
        order: &Order,
        details: serde_json::Value,
    ) -> ReconcileResult<()> {
        let entry = AuditEntry {
            admin_id: admin.admin_id,
            action,
            resource_type: "order".to_string(),
            resource_id: order.id.to_string(),
            details,
            created_at: self.env.clock.now(),
        };
        self.env
            .store
            .append_audit(&entry)
            .await
            .map_err(|e| ReconcileError::partial(Step::AppendAudit, e.to_string()))
    }

    async fn completed(&self, order_id: OrderId, payment_id: Option<PaymentId>) -> TransitionOutcome {
        let notified = self.dispatch_confirmation(order_id).await;
        TransitionOutcome {
            payment_id,
            notified: Some(notified),
            ..TransitionOutcome::changed(order_id, OrderStatus::Completed)
        }
    }

    async fn dispatch_confirmation(&self, order_id: OrderId) -> bool {
        match self.env.notifier.send_order_confirmation(order_id).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(order_id = %order_id, error = %err, "Order confirmation not sent");
                false
            }
        }
    }

    async fn sign_proof(&self, path: Option<&str>) -> Option<String> {
        sign_optional(&*self.env.storage, path, self.settings.signed_url_ttl)
            .await
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "Could not sign transfer proof URL");
                None
            })
    }
}

fn provider_call<T>(result: Result<T, GatewayError>) -> ReconcileResult<T> {
    match result {
        Ok(value) => {
            metrics::record_provider_call("ok");
            Ok(value)
        }
        Err(err) => {
            let timed_out = matches!(err, GatewayError::Timeout(_));
            metrics::record_provider_call(if timed_out { "timeout" } else { "error" });
            tracing::warn!(error = %err, "Payment provider call failed");
            Err(ReconcileError::Unavailable {
                message: err.to_string(),
                timed_out,
            })
        }
    }
}

fn observed<T>(action: &'static str, result: ReconcileResult<T>) -> ReconcileResult<T> {
    metrics::record_transition(action, &result);
    match &result {
        Err(ReconcileError::PartialFailure { step, message }) => tracing::error!(
            action,
            step = %step,
            error = %message,
            "Transition stopped partway; manual reconciliation needed"
        ),
        Err(err) => tracing::debug!(action, error = %err, "Transition refused"),
        Ok(_) => {}
    }
    result
}
