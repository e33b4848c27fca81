//! Multi-step transition failure tests.
//!
//! A `FailingStore` arms one store call at a time. Each test checks the
//! reported step, what was left applied, and that a retry after the fault
//! clears finishes the transition exactly once. Competing decisions on one
//! order are replayed by running the rival transition right before a
//! store call; exactly one of them may settle the order.
//!
//! Run with: `cargo test -p raffle --test partial_failure_test`

#![allow(clippy::unwrap_used, clippy::panic)]

use raffle::payment_gateway::ChargeStatus;
use raffle::reconcile::ReserveRequest;
use raffle::store::Selection;
use raffle::types::{AuditAction, OrderStatus, PaymentMethod, TicketStatus};
use raffle::{ReconcileError, Step};
use raffle_testing::{FailMode, FailPoint, Scenario};

fn assert_partial(err: &ReconcileError, expected: Step) {
    match err {
        ReconcileError::PartialFailure { step, .. } => assert_eq!(*step, expected, "{err:?}"),
        other => panic!("expected partial failure at {expected}, got {other:?}"),
    }
}

// ============================================================================
// Approval
// ============================================================================

#[tokio::test]
async fn test_order_update_failure_applies_nothing() {
    let scenario = Scenario::new();
    let order = scenario.transfer_order(OrderStatus::PendingApproval);
    scenario.faults.fail(FailPoint::UpdateOrder, FailMode::Error);

    let err = scenario
        .reconciler()
        .approve_transfer(order.id, &scenario.admin)
        .await
        .unwrap_err();

    assert_partial(&err, Step::UpdateOrder);
    assert_eq!(scenario.order(order.id).await.status, OrderStatus::PendingApproval);
    assert!(scenario.store.payments().unwrap().is_empty());
    assert!(scenario.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_payment_failure_resumes_on_retry() {
    let scenario = Scenario::new();
    let order = scenario.transfer_order(OrderStatus::PendingApproval);
    let reconciler = scenario.reconciler();
    scenario.faults.fail(FailPoint::InsertPayment, FailMode::Error);

    let err = reconciler.approve_transfer(order.id, &scenario.admin).await.unwrap_err();

    assert_partial(&err, Step::InsertPayment);
    assert_eq!(scenario.order(order.id).await.status, OrderStatus::Completed);
    assert!(scenario.store.payments().unwrap().is_empty());
    assert_eq!(scenario.ticket("00012").status, TicketStatus::Reserved);

    scenario.faults.heal(FailPoint::InsertPayment);
    let outcome = reconciler.approve_transfer(order.id, &scenario.admin).await.unwrap();

    assert!(outcome.changed);
    assert!(outcome.payment_id.is_some());
    assert_eq!(scenario.store.payments().unwrap().len(), 1);
    assert_eq!(scenario.ticket("00012").status, TicketStatus::Paid);
    assert_eq!(scenario.ticket("00013").status, TicketStatus::Paid);

    let audit = scenario.store.audit_log().unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].details["resumed"], serde_json::json!(true));

    let settled = reconciler.approve_transfer(order.id, &scenario.admin).await.unwrap();
    assert!(!settled.changed);
    assert_eq!(scenario.store.payments().unwrap().len(), 1);
}

#[tokio::test]
async fn test_zero_ticket_rows_reports_concurrent_change() {
    let scenario = Scenario::new();
    let order = scenario.transfer_order(OrderStatus::PendingApproval);
    let reconciler = scenario.reconciler();
    scenario.faults.fail(FailPoint::MarkTicketsPaid, FailMode::ZeroRows);

    let err = reconciler.approve_transfer(order.id, &scenario.admin).await.unwrap_err();

    assert_partial(&err, Step::MarkTicketsPaid);
    assert!(err.to_string().contains("possible concurrent change"), "{err}");
    assert_eq!(scenario.order(order.id).await.status, OrderStatus::Completed);
    assert_eq!(scenario.store.payments().unwrap().len(), 1);

    scenario.faults.heal_all();
    let outcome = reconciler.approve_transfer(order.id, &scenario.admin).await.unwrap();

    assert!(outcome.changed);
    assert_eq!(outcome.payment_id, None);
    assert_eq!(scenario.store.payments().unwrap().len(), 1);
    assert_eq!(scenario.ticket("00012").status, TicketStatus::Paid);
}

#[tokio::test]
async fn test_lost_update_race_is_a_conflict() {
    let scenario = Scenario::new();
    let order = scenario.transfer_order(OrderStatus::PendingApproval);
    scenario.faults.fail(FailPoint::UpdateOrder, FailMode::ZeroRows);

    let err = scenario
        .reconciler()
        .approve_transfer(order.id, &scenario.admin)
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Conflict(_)), "{err:?}");
    assert!(scenario.store.payments().unwrap().is_empty());
}

#[tokio::test]
async fn test_duplicate_payment_insert_is_a_conflict() {
    let scenario = Scenario::new();
    let order = scenario.transfer_order(OrderStatus::PendingApproval);
    scenario.faults.fail(FailPoint::InsertPayment, FailMode::Conflict);

    let err = scenario
        .reconciler()
        .approve_transfer(order.id, &scenario.admin)
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Conflict(_)), "{err:?}");
    assert!(scenario.store.payments().unwrap().is_empty());
}

#[tokio::test]
async fn test_audit_failure_after_completion() {
    let scenario = Scenario::new();
    let order = scenario.transfer_order(OrderStatus::PendingApproval);
    scenario.faults.fail(FailPoint::AppendAudit, FailMode::Error);

    let err = scenario
        .reconciler()
        .approve_transfer(order.id, &scenario.admin)
        .await
        .unwrap_err();

    assert_partial(&err, Step::AppendAudit);
    assert_eq!(scenario.order(order.id).await.status, OrderStatus::Completed);
    assert_eq!(scenario.store.payments().unwrap().len(), 1);
    assert_eq!(scenario.ticket("00012").status, TicketStatus::Paid);
    assert!(scenario.store.audit_log().unwrap().is_empty());
}

// ============================================================================
// Rejection
// ============================================================================

#[tokio::test]
async fn test_release_failure_after_reject_resumes() {
    let scenario = Scenario::new();
    let order = scenario.transfer_order(OrderStatus::PendingApproval);
    let reconciler = scenario.reconciler();
    scenario.faults.fail(FailPoint::ReleaseTickets, FailMode::Error);

    let err = reconciler
        .reject_transfer(order.id, Some("monto incorrecto"), &scenario.admin)
        .await
        .unwrap_err();

    assert_partial(&err, Step::ReleaseTickets);
    let stored = scenario.order(order.id).await;
    assert_eq!(stored.status, OrderStatus::Rejected);
    assert_eq!(stored.rejection_reason.as_deref(), Some("monto incorrecto"));
    assert_eq!(scenario.ticket("00012").status, TicketStatus::Reserved);
    assert!(scenario.store.audit_log().unwrap().is_empty());

    scenario.faults.heal(FailPoint::ReleaseTickets);
    let outcome = reconciler.reject_transfer(order.id, None, &scenario.admin).await.unwrap();

    assert!(outcome.changed);
    assert_eq!(scenario.ticket("00012").status, TicketStatus::Available);
    assert_eq!(scenario.ticket("00013").status, TicketStatus::Available);
    assert_eq!(
        scenario.order(order.id).await.rejection_reason.as_deref(),
        Some("monto incorrecto")
    );
    let audit = scenario.store.audit_log().unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, AuditAction::TransferReject);
}

#[tokio::test]
async fn test_card_cancel_release_failure_is_partial() {
    let scenario = Scenario::new();
    let order = scenario.card_order();
    scenario
        .payments
        .answer(Ok(ChargeStatus::Canceled {
            reason: "declinada".to_string(),
        }));
    scenario.faults.fail(FailPoint::ReleaseTickets, FailMode::ZeroRows);

    let err = scenario
        .reconciler()
        .confirm_card_payment(order.id, "pp-ref")
        .await
        .unwrap_err();

    assert_partial(&err, Step::ReleaseTickets);
    assert_eq!(scenario.order(order.id).await.status, OrderStatus::Rejected);
}

// ============================================================================
// Competing admin decisions
// ============================================================================

#[tokio::test]
async fn test_reject_landing_before_approval_write_wins() {
    let scenario = Scenario::new();
    let order = scenario.transfer_order(OrderStatus::PendingApproval);
    let reconciler = scenario.reconciler();
    let rival = reconciler.clone();
    let admin = scenario.admin.clone();
    scenario.faults.interleave(FailPoint::UpdateOrder, move || async move {
        rival
            .reject_transfer(order.id, Some("monto incorrecto"), &admin)
            .await
            .unwrap();
    });

    let err = reconciler.approve_transfer(order.id, &scenario.admin).await.unwrap_err();

    assert!(matches!(err, ReconcileError::Conflict(_)), "{err:?}");
    let stored = scenario.order(order.id).await;
    assert_eq!(stored.status, OrderStatus::Rejected);
    assert_eq!(stored.rejection_reason.as_deref(), Some("monto incorrecto"));
    assert!(scenario.store.payments().unwrap().is_empty());
    for number in ["00012", "00013"] {
        let ticket = scenario.ticket(number);
        assert_eq!(ticket.status, TicketStatus::Available, "ticket {number}");
        assert_eq!(ticket.client_id, None);
    }
    let audit = scenario.store.audit_log().unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, AuditAction::TransferReject);
    assert!(scenario.notifier.sent().is_empty());
}

#[tokio::test]
async fn test_approval_landing_before_reject_write_wins() {
    let scenario = Scenario::new();
    let order = scenario.transfer_order(OrderStatus::PendingApproval);
    let reconciler = scenario.reconciler();
    let rival = reconciler.clone();
    let admin = scenario.admin.clone();
    scenario.faults.interleave(FailPoint::UpdateOrder, move || async move {
        rival.approve_transfer(order.id, &admin).await.unwrap();
    });

    let err = reconciler
        .reject_transfer(order.id, Some("duplicado"), &scenario.admin)
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Conflict(_)), "{err:?}");
    let stored = scenario.order(order.id).await;
    assert_eq!(stored.status, OrderStatus::Completed);
    assert_eq!(stored.rejection_reason, None);
    assert_eq!(scenario.store.payments().unwrap().len(), 1);
    assert_eq!(scenario.ticket("00012").status, TicketStatus::Paid);
    assert_eq!(scenario.ticket("00013").status, TicketStatus::Paid);
    let audit = scenario.store.audit_log().unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].action, AuditAction::TransferApprove);
}

#[tokio::test]
async fn test_reject_during_approval_steps_is_refused() {
    let scenario = Scenario::new();
    let order = scenario.transfer_order(OrderStatus::PendingApproval);
    let reconciler = scenario.reconciler();
    let rival = reconciler.clone();
    let admin = scenario.admin.clone();
    scenario.faults.interleave(FailPoint::InsertPayment, move || async move {
        let err = rival.reject_transfer(order.id, None, &admin).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Conflict(_)), "{err:?}");
    });

    let outcome = reconciler.approve_transfer(order.id, &scenario.admin).await.unwrap();

    assert_eq!(outcome.status, OrderStatus::Completed);
    assert_eq!(scenario.store.payments().unwrap().len(), 1);
    assert_eq!(scenario.ticket("00012").status, TicketStatus::Paid);
    assert_eq!(scenario.order(order.id).await.rejection_reason, None);
}

#[tokio::test]
async fn test_card_cancel_landing_before_approval_wins() {
    let scenario = Scenario::new();
    let order = scenario.card_order();
    scenario.payments.answer(Ok(ChargeStatus::Approved { transaction_id: Some("tx-9".to_string()) }));
    scenario.payments.answer(Ok(ChargeStatus::Canceled { reason: "expirado".to_string() }));
    let reconciler = scenario.reconciler();
    let rival = reconciler.clone();
    scenario.faults.interleave(FailPoint::UpdateOrder, move || async move {
        rival.confirm_card_payment(order.id, "pp-ref").await.unwrap();
    });

    let err = reconciler.confirm_card_payment(order.id, "pp-ref").await.unwrap_err();

    assert!(matches!(err, ReconcileError::Conflict(_)), "{err:?}");
    assert_eq!(scenario.order(order.id).await.status, OrderStatus::Rejected);
    assert!(scenario.store.payments().unwrap().is_empty());
    assert_eq!(scenario.ticket("00020").status, TicketStatus::Available);
}

// ============================================================================
// Reservation compensation
// ============================================================================

#[tokio::test]
async fn test_failed_reopen_releases_tickets_again() {
    let scenario = Scenario::new();
    let order = scenario.transfer_order(OrderStatus::PendingApproval);
    let reconciler = scenario.reconciler();
    reconciler.reject_transfer(order.id, None, &scenario.admin).await.unwrap();
    scenario.faults.fail(FailPoint::UpdateOrder, FailMode::Error);

    let err = reconciler
        .notify_transfer(order.id, &raffle::contact::ContactClaim::email("ana.perez@example.com"))
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Store(_)), "{err:?}");
    assert_eq!(scenario.order(order.id).await.status, OrderStatus::Rejected);
    for number in ["00012", "00013"] {
        let ticket = scenario.ticket(number);
        assert_eq!(ticket.status, TicketStatus::Available, "ticket {number}");
        assert_eq!(ticket.client_id, None);
    }
}

#[tokio::test]
async fn test_failed_reopen_and_release_names_the_step() {
    let scenario = Scenario::new();
    let order = scenario.transfer_order(OrderStatus::PendingApproval);
    let reconciler = scenario.reconciler();
    reconciler.reject_transfer(order.id, None, &scenario.admin).await.unwrap();
    scenario.faults.fail(FailPoint::UpdateOrder, FailMode::Error);
    scenario.faults.fail(FailPoint::ReleaseReservation, FailMode::Error);

    let err = reconciler
        .notify_transfer(order.id, &raffle::contact::ContactClaim::email("ana.perez@example.com"))
        .await
        .unwrap_err();

    assert_partial(&err, Step::ReleaseReservation);
    assert_eq!(scenario.ticket("00012").status, TicketStatus::Reserved);
}

fn two_numbers(scenario: &Scenario) -> ReserveRequest {
    ReserveRequest {
        raffle_id: scenario.raffle_id,
        client_id: scenario.client.id,
        selection: Selection::Numbers(vec![Scenario::number("00070"), Scenario::number("00071")]),
        payment_method: PaymentMethod::Transfer,
        transfer_proof_path: None,
    }
}

#[tokio::test]
async fn test_order_insert_failure_releases_reservation() {
    let scenario = Scenario::new();
    scenario.faults.fail(FailPoint::InsertOrder, FailMode::Error);

    let err = scenario
        .reconciler()
        .reserve(two_numbers(&scenario))
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Store(_)), "{err:?}");
    for number in ["00070", "00071"] {
        let ticket = scenario.ticket(number);
        assert_eq!(ticket.status, TicketStatus::Available);
        assert_eq!(ticket.client_id, None);
        assert_eq!(ticket.reserved_until, None);
    }
}

#[tokio::test]
async fn test_failed_compensation_is_partial() {
    let scenario = Scenario::new();
    scenario.faults.fail(FailPoint::InsertOrder, FailMode::Error);
    scenario.faults.fail(FailPoint::ReleaseReservation, FailMode::Error);

    let err = scenario
        .reconciler()
        .reserve(two_numbers(&scenario))
        .await
        .unwrap_err();

    assert_partial(&err, Step::ReleaseReservation);
    assert_eq!(scenario.ticket("00070").status, TicketStatus::Reserved);
}

#[tokio::test]
async fn test_reservation_store_failure_is_not_partial() {
    let scenario = Scenario::new();
    scenario.faults.fail(FailPoint::ReserveTickets, FailMode::Error);

    let err = scenario
        .reconciler()
        .reserve(two_numbers(&scenario))
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Store(_)), "{err:?}");
    assert_eq!(scenario.ticket("00070").status, TicketStatus::Available);
}
