//! Order lifecycle decisions.
//!
//! Pure functions from the current order (and the few facts read alongside
//! it) to the writes a transition must perform. Nothing here touches a
//! gateway; [`crate::reconcile::Reconciler`] reads the facts, asks for a
//! plan and executes it step by step.
//!
//! ```text
//! pending ──proof/notify──▶ pending_approval ──approve──▶ completed
//!    │                          │
//!    └──────────reject──────────┴──────────▶ rejected
//! ```

use crate::contact::ContactClaim;
use crate::error::{ReconcileError, ReconcileResult, Step};
use crate::store::{OrderPatch, Selection};
use crate::types::{Order, OrderStatus, PaymentMethod, TicketNumber};
use std::collections::HashSet;

/// Reason stored when an admin rejects without giving one.
pub const DEFAULT_REJECTION_REASON: &str = "Transferencia rechazada";

/// Writes needed to bring an order to `completed` with its payment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionPlan {
    /// Completed and paid already; nothing to write.
    AlreadyCompleted,
    /// Run the transition. Steps already applied by an earlier attempt are
    /// skipped; the ticket and audit steps always run.
    Execute {
        /// Move the order to `completed`
        complete_order: bool,
        /// Record the approved payment
        insert_payment: bool,
    },
}

/// Writes needed to reject an order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RejectionPlan {
    /// Rejected already and no ticket is held; nothing to write.
    AlreadyRejected,
    /// Rejected already, but tickets are still held by the client from an
    /// earlier attempt that stopped before releasing them.
    ReleaseLeftovers {
        /// Tickets still owned
        held: u64,
    },
    /// Run the full rejection.
    Execute {
        /// Stored reason
        reason: String,
    },
}

/// Validate an intake selection.
///
/// # Errors
///
/// Returns [`ReconcileError::Validation`] for an empty or oversized
/// selection and for duplicate numbers.
pub fn validate_selection(selection: &Selection, max_tickets: u32) -> ReconcileResult<()> {
    let requested = selection.len();
    if requested == 0 {
        return Err(ReconcileError::Validation("at least one ticket is required".to_string()));
    }
    if requested > usize::try_from(max_tickets).unwrap_or(usize::MAX) {
        return Err(ReconcileError::Validation(format!(
            "at most {max_tickets} tickets per order"
        )));
    }
    if let Selection::Numbers(numbers) = selection {
        let unique: HashSet<&TicketNumber> = numbers.iter().collect();
        if unique.len() != numbers.len() {
            return Err(ReconcileError::Validation("duplicate ticket numbers".to_string()));
        }
    }
    Ok(())
}

/// Status a freshly reserved order starts in.
#[must_use]
pub const fn initial_status(method: PaymentMethod, has_proof: bool) -> OrderStatus {
    match (method, has_proof) {
        (PaymentMethod::Transfer, true) => OrderStatus::PendingApproval,
        _ => OrderStatus::Pending,
    }
}

/// Guard for a buyer update. A rejected order is reopened only from
/// `rejected`, after its tickets have been reserved again.
fn buyer_patch(order: &Order) -> OrderPatch {
    if order.status == OrderStatus::Rejected {
        OrderPatch::default().only_from(&[OrderStatus::Rejected])
    } else {
        OrderPatch::default().only_open()
    }
}

/// Whether a buyer update has to hold the order's tickets again first.
#[must_use]
pub fn reopens(order: &Order) -> bool {
    order.status == OrderStatus::Rejected
}

/// Buyer says a transfer was sent.
///
/// # Errors
///
/// Returns [`ReconcileError::Validation`] for an empty claim and
/// [`ReconcileError::Conflict`] for a completed order.
pub fn plan_transfer_notice(order: &Order, claim: &ContactClaim) -> ReconcileResult<OrderPatch> {
    if claim.is_empty() {
        return Err(ReconcileError::Validation("email or phone is required".to_string()));
    }
    if order.status.is_terminal() {
        return Err(ReconcileError::Conflict(format!("order {} is already completed", order.id)));
    }

    let status = if order.transfer_proof_path.is_some() {
        OrderStatus::PendingApproval
    } else {
        OrderStatus::Pending
    };

    Ok(buyer_patch(order)
        .payment_method(PaymentMethod::Transfer)
        .status(status)
        .rejection_reason(None))
}

/// Buyer records the uploaded proof object.
///
/// # Errors
///
/// Returns [`ReconcileError::Validation`] for an empty claim or path and
/// [`ReconcileError::Conflict`] for a completed order.
pub fn plan_proof_attachment(order: &Order, claim: &ContactClaim, path: &str) -> ReconcileResult<OrderPatch> {
    let path = path.trim();
    if path.is_empty() {
        return Err(ReconcileError::Validation("proof path is required".to_string()));
    }
    if claim.is_empty() {
        return Err(ReconcileError::Validation("email or phone is required".to_string()));
    }
    if order.status.is_terminal() {
        return Err(ReconcileError::Conflict(format!("order {} is already completed", order.id)));
    }

    Ok(buyer_patch(order)
        .transfer_proof_path(path.to_string())
        .payment_method(PaymentMethod::Transfer)
        .status(OrderStatus::PendingApproval)
        .rejection_reason(None))
}

/// What the store says about an order right before completing it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompletionFacts {
    /// An approved payment is recorded for the order
    pub has_approved_payment: bool,
    /// Order tickets owned by the order's client
    pub owned_tickets: u64,
    /// Of those, tickets already `paid`
    pub paid_tickets: u64,
}

/// Plan the completion of an order paid with `method`.
///
/// A completed order with its approved payment and paid tickets is a no-op.
/// A completed order missing either resumes at the first missing write, so
/// the payment is never recorded twice.
///
/// # Errors
///
/// Returns [`ReconcileError::Conflict`] when the order uses another
/// payment method, was rejected, or its tickets are no longer all owned by
/// its client.
pub fn plan_completion(
    order: &Order,
    method: PaymentMethod,
    facts: CompletionFacts,
) -> ReconcileResult<CompletionPlan> {
    if order.payment_method != method {
        return Err(ReconcileError::Conflict(format!(
            "order {} is paid by {}, not {method}",
            order.id, order.payment_method
        )));
    }

    let expected = ticket_count(order);
    if order.status == OrderStatus::Completed
        && facts.has_approved_payment
        && facts.paid_tickets == expected
    {
        return Ok(CompletionPlan::AlreadyCompleted);
    }
    if order.status == OrderStatus::Rejected {
        return Err(ReconcileError::Conflict(format!("order {} was rejected", order.id)));
    }
    if facts.owned_tickets != expected {
        return Err(ReconcileError::Conflict(format!(
            "client owns {} of the {expected} tickets in order {}",
            facts.owned_tickets, order.id
        )));
    }

    Ok(CompletionPlan::Execute {
        complete_order: order.status != OrderStatus::Completed,
        insert_payment: !facts.has_approved_payment,
    })
}

/// Plan an admin rejection.
///
/// # Errors
///
/// Returns [`ReconcileError::Conflict`] for completed orders and for orders
/// paid by `method` other than the expected one.
pub fn plan_rejection(
    order: &Order,
    method: PaymentMethod,
    reason: Option<&str>,
    owned_tickets: u64,
) -> ReconcileResult<RejectionPlan> {
    if order.status.is_terminal() {
        return Err(ReconcileError::Conflict(format!(
            "order {} is completed and cannot be rejected",
            order.id
        )));
    }
    if order.payment_method != method {
        return Err(ReconcileError::Conflict(format!(
            "order {} is paid by {}, not {method}",
            order.id, order.payment_method
        )));
    }
    if order.status == OrderStatus::Rejected {
        return Ok(if owned_tickets == 0 {
            RejectionPlan::AlreadyRejected
        } else {
            RejectionPlan::ReleaseLeftovers { held: owned_tickets }
        });
    }

    Ok(RejectionPlan::Execute {
        reason: rejection_reason(reason),
    })
}

/// Card checkout may only start for a pending card order.
///
/// # Errors
///
/// Returns [`ReconcileError::Conflict`] otherwise.
pub fn check_card_checkout(order: &Order) -> ReconcileResult<()> {
    if order.payment_method != PaymentMethod::Card {
        return Err(ReconcileError::Conflict(format!("order {} is not a card order", order.id)));
    }
    if order.status != OrderStatus::Pending {
        return Err(ReconcileError::Conflict(format!(
            "order {} is {}, checkout needs pending",
            order.id, order.status
        )));
    }
    Ok(())
}

/// Invoices are only sent for completed orders.
///
/// # Errors
///
/// Returns [`ReconcileError::Conflict`] otherwise.
pub fn check_invoice_resend(order: &Order) -> ReconcileResult<()> {
    if order.status == OrderStatus::Completed {
        Ok(())
    } else {
        Err(ReconcileError::Conflict(format!(
            "order {} is {}, invoices need completed",
            order.id, order.status
        )))
    }
}

/// Trimmed reason, or the default when blank.
#[must_use]
pub fn rejection_reason(reason: Option<&str>) -> String {
    reason
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or(DEFAULT_REJECTION_REASON)
        .to_string()
}

/// Post-condition of a ticket write: exactly `expected` rows changed.
///
/// Zero rows means another writer took the tickets first and is reported
/// apart from a partial count.
///
/// # Errors
///
/// Returns [`ReconcileError::PartialFailure`] naming `step`.
pub fn check_ticket_rows(step: Step, expected: u64, actual: u64) -> ReconcileResult<()> {
    match actual {
        n if n == expected => Ok(()),
        0 => Err(ReconcileError::partial(
            step,
            format!("no ticket rows updated (expected {expected}); possible concurrent change"),
        )),
        n => Err(ReconcileError::partial(
            step,
            format!("updated {n} ticket rows, expected {expected}"),
        )),
    }
}

/// Number of tickets an order claims.
#[must_use]
pub fn ticket_count(order: &Order) -> u64 {
    u64::try_from(order.numbers.len()).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{ClientId, Money, OrderId, RaffleId};
    use chrono::Utc;

    fn order(method: PaymentMethod, status: OrderStatus) -> Order {
        Order {
            id: OrderId::new(),
            raffle_id: RaffleId::new(),
            client_id: ClientId::new(),
            numbers: vec![TicketNumber::parse("12").unwrap(), TicketNumber::parse("13").unwrap()],
            total: Money::from_cents(200),
            payment_method: method,
            status,
            rejection_reason: Some("old".to_string()),
            transfer_proof_path: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_initial_status() {
        assert_eq!(initial_status(PaymentMethod::Card, true), OrderStatus::Pending);
        assert_eq!(initial_status(PaymentMethod::Transfer, false), OrderStatus::Pending);
        assert_eq!(initial_status(PaymentMethod::Transfer, true), OrderStatus::PendingApproval);
    }

    #[test]
    fn test_selection_validation() {
        assert!(validate_selection(&Selection::Count(0), 10).is_err());
        assert!(validate_selection(&Selection::Count(11), 10).is_err());
        assert!(validate_selection(&Selection::Count(10), 10).is_ok());

        let n = TicketNumber::parse("1").unwrap();
        let dup = Selection::Numbers(vec![n.clone(), n]);
        assert!(matches!(validate_selection(&dup, 10), Err(ReconcileError::Validation(_))));
    }

    #[test]
    fn test_notice_targets_depend_on_proof() {
        let claim = ContactClaim::email("a@b.c");
        let mut o = order(PaymentMethod::Card, OrderStatus::Pending);

        let patch = plan_transfer_notice(&o, &claim).unwrap();
        assert_eq!(patch.status, Some(OrderStatus::Pending));
        assert_eq!(patch.payment_method, Some(PaymentMethod::Transfer));
        assert_eq!(patch.rejection_reason, Some(None));
        assert!(patch.admits(OrderStatus::PendingApproval));
        assert!(!patch.admits(OrderStatus::Rejected));
        assert!(!patch.admits(OrderStatus::Completed));

        o.transfer_proof_path = Some("o/proof.png".to_string());
        let patch = plan_transfer_notice(&o, &claim).unwrap();
        assert_eq!(patch.status, Some(OrderStatus::PendingApproval));
    }

    #[test]
    fn test_notice_refuses_completed_and_empty_claim() {
        let o = order(PaymentMethod::Transfer, OrderStatus::Completed);
        assert!(matches!(
            plan_transfer_notice(&o, &ContactClaim::email("a@b.c")),
            Err(ReconcileError::Conflict(_))
        ));

        let o = order(PaymentMethod::Transfer, OrderStatus::Pending);
        assert!(matches!(
            plan_transfer_notice(&o, &ContactClaim::default()),
            Err(ReconcileError::Validation(_))
        ));
    }

    #[test]
    fn test_notice_on_rejected_order_reopens_from_rejected_only() {
        let o = order(PaymentMethod::Transfer, OrderStatus::Rejected);
        assert!(reopens(&o));

        let patch = plan_transfer_notice(&o, &ContactClaim::email("a@b.c")).unwrap();
        assert!(patch.admits(OrderStatus::Rejected));
        assert!(!patch.admits(OrderStatus::Pending));
        assert!(!patch.admits(OrderStatus::Completed));
    }

    fn facts(has_approved_payment: bool, owned_tickets: u64, paid_tickets: u64) -> CompletionFacts {
        CompletionFacts {
            has_approved_payment,
            owned_tickets,
            paid_tickets,
        }
    }

    #[test]
    fn test_completion_plans() {
        let pending = order(PaymentMethod::Transfer, OrderStatus::PendingApproval);
        assert_eq!(
            plan_completion(&pending, PaymentMethod::Transfer, facts(false, 2, 0)).unwrap(),
            CompletionPlan::Execute { complete_order: true, insert_payment: true }
        );

        let completed = order(PaymentMethod::Transfer, OrderStatus::Completed);
        assert_eq!(
            plan_completion(&completed, PaymentMethod::Transfer, facts(true, 2, 2)).unwrap(),
            CompletionPlan::AlreadyCompleted
        );
        assert_eq!(
            plan_completion(&completed, PaymentMethod::Transfer, facts(false, 2, 0)).unwrap(),
            CompletionPlan::Execute { complete_order: false, insert_payment: true }
        );
        assert_eq!(
            plan_completion(&completed, PaymentMethod::Transfer, facts(true, 2, 0)).unwrap(),
            CompletionPlan::Execute { complete_order: false, insert_payment: false }
        );
    }

    #[test]
    fn test_completion_conflicts() {
        let card = order(PaymentMethod::Card, OrderStatus::Pending);
        assert!(matches!(
            plan_completion(&card, PaymentMethod::Transfer, facts(false, 2, 0)),
            Err(ReconcileError::Conflict(_))
        ));

        let rejected = order(PaymentMethod::Transfer, OrderStatus::Rejected);
        assert!(matches!(
            plan_completion(&rejected, PaymentMethod::Transfer, facts(false, 2, 0)),
            Err(ReconcileError::Conflict(_))
        ));

        let stolen = order(PaymentMethod::Transfer, OrderStatus::PendingApproval);
        assert!(matches!(
            plan_completion(&stolen, PaymentMethod::Transfer, facts(false, 1, 0)),
            Err(ReconcileError::Conflict(_))
        ));
    }

    #[test]
    fn test_rejection_plans() {
        let o = order(PaymentMethod::Transfer, OrderStatus::PendingApproval);
        assert_eq!(
            plan_rejection(&o, PaymentMethod::Transfer, Some("  no coincide monto "), 2).unwrap(),
            RejectionPlan::Execute { reason: "no coincide monto".to_string() }
        );
        assert_eq!(
            plan_rejection(&o, PaymentMethod::Transfer, Some("   "), 2).unwrap(),
            RejectionPlan::Execute { reason: DEFAULT_REJECTION_REASON.to_string() }
        );

        let rejected = order(PaymentMethod::Transfer, OrderStatus::Rejected);
        assert_eq!(
            plan_rejection(&rejected, PaymentMethod::Transfer, None, 0).unwrap(),
            RejectionPlan::AlreadyRejected
        );
        assert_eq!(
            plan_rejection(&rejected, PaymentMethod::Transfer, None, 2).unwrap(),
            RejectionPlan::ReleaseLeftovers { held: 2 }
        );

        let completed = order(PaymentMethod::Transfer, OrderStatus::Completed);
        assert!(matches!(
            plan_rejection(&completed, PaymentMethod::Transfer, None, 2),
            Err(ReconcileError::Conflict(_))
        ));
    }

    #[test]
    fn test_ticket_row_post_condition() {
        assert!(check_ticket_rows(Step::MarkTicketsPaid, 2, 2).is_ok());

        let raced = check_ticket_rows(Step::MarkTicketsPaid, 2, 0).unwrap_err();
        let short = check_ticket_rows(Step::MarkTicketsPaid, 2, 1).unwrap_err();
        assert_ne!(raced, short);
        assert!(raced.to_string().contains("possible concurrent change"));
        assert!(short.to_string().contains("updated 1 ticket rows, expected 2"));
    }

    #[test]
    fn test_card_checkout_rules() {
        assert!(check_card_checkout(&order(PaymentMethod::Card, OrderStatus::Pending)).is_ok());
        assert!(check_card_checkout(&order(PaymentMethod::Transfer, OrderStatus::Pending)).is_err());
        assert!(check_card_checkout(&order(PaymentMethod::Card, OrderStatus::Completed)).is_err());
    }
}
