//! HTTP API tests.
//!
//! Drives the full router with `tower::ServiceExt::oneshot`; no socket is
//! opened.
//!
//! Run with: `cargo test -p raffle --test http_api_test`

#![allow(clippy::unwrap_used)]

use axum::body::{Body, to_bytes};
use axum::Router;
use http::{Method, Request, StatusCode, header};
use raffle::server::build_router;
use raffle::types::{OrderStatus, TicketStatus};
use raffle_testing::{ADMIN_TOKEN, FailMode, FailPoint, Scenario};
use serde_json::{Value, json};
use tower::ServiceExt;

fn app(scenario: &Scenario) -> Router {
    build_router(scenario.app_state(), &[])
}

fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health() {
    let scenario = Scenario::new();

    let (status, body) = send(app(&scenario), request(Method::GET, "/health", None, None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_readiness_follows_store() {
    let scenario = Scenario::new();

    let (status, body) = send(app(&scenario), request(Method::GET, "/ready", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);

    scenario.faults.fail(FailPoint::Ping, FailMode::Error);
    let (status, body) = send(app(&scenario), request(Method::GET, "/ready", None, None)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["database"], false);
}

// ============================================================================
// Admin authorization
// ============================================================================

#[tokio::test]
async fn test_admin_routes_need_a_token() {
    let scenario = Scenario::new();
    let order = scenario.transfer_order(OrderStatus::PendingApproval);
    let uri = format!("/api/admin/transfers/{}/approve", order.id);

    let (status, body) = send(app(&scenario), request(Method::POST, &uri, None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let (status, _) = send(app(&scenario), request(Method::POST, &uri, Some("wrong"), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert_eq!(scenario.order(order.id).await.status, OrderStatus::PendingApproval);
}

#[tokio::test]
async fn test_bad_order_id_is_bad_request() {
    let scenario = Scenario::new();

    let (status, body) = send(
        app(&scenario),
        request(Method::POST, "/api/admin/transfers/not-a-uuid/approve", Some(ADMIN_TOKEN), None),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
}

// ============================================================================
// Admin transitions
// ============================================================================

#[tokio::test]
async fn test_approve_answers_outcome() {
    let scenario = Scenario::new();
    let order = scenario.transfer_order(OrderStatus::PendingApproval);
    let uri = format!("/api/admin/transfers/{}/approve", order.id);

    let (status, body) = send(app(&scenario), request(Method::POST, &uri, Some(ADMIN_TOKEN), None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["order_id"], order.id.to_string());
    assert_eq!(body["status"], "completed");
    assert_eq!(body["changed"], true);
    assert_eq!(body["notified"], true);
    assert!(body["payment_id"].is_string());
}

#[tokio::test]
async fn test_approve_card_order_is_conflict() {
    let scenario = Scenario::new();
    let order = scenario.card_order();
    let uri = format!("/api/admin/transfers/{}/approve", order.id);

    let (status, body) = send(app(&scenario), request(Method::POST, &uri, Some(ADMIN_TOKEN), None)).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
}

#[tokio::test]
async fn test_partial_failure_names_the_step() {
    let scenario = Scenario::new();
    let order = scenario.transfer_order(OrderStatus::PendingApproval);
    scenario.faults.fail(FailPoint::MarkTicketsPaid, FailMode::Error);
    let uri = format!("/api/admin/transfers/{}/approve", order.id);

    let (status, body) = send(app(&scenario), request(Method::POST, &uri, Some(ADMIN_TOKEN), None)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "PARTIAL_FAILURE");
    assert_eq!(body["step"], "mark_tickets_paid");
    assert!(uuid::Uuid::parse_str(body["correlation_id"].as_str().unwrap()).is_ok());
}

#[tokio::test]
async fn test_store_error_quotes_request_correlation_id() {
    let scenario = Scenario::new();
    let order = scenario.transfer_order(OrderStatus::PendingApproval);
    scenario.faults.fail(FailPoint::FindOrder, FailMode::Error);
    let uri = format!("/api/admin/transfers/{}/approve", order.id);
    let correlation_id = uuid::Uuid::new_v4();
    let mut req = request(Method::POST, &uri, Some(ADMIN_TOKEN), None);
    req.headers_mut()
        .insert("x-correlation-id", correlation_id.to_string().parse().unwrap());

    let (status, body) = send(app(&scenario), req).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Store error");
    assert_eq!(body["correlation_id"], correlation_id.to_string());
}

#[tokio::test]
async fn test_reject_with_and_without_body() {
    let scenario = Scenario::new();
    let first = scenario.transfer_order(OrderStatus::PendingApproval);
    let second = scenario.place_order(&["00060"], raffle::types::PaymentMethod::Transfer, OrderStatus::Pending, None);

    let uri = format!("/api/admin/transfers/{}/reject", first.id);
    let (status, body) = send(
        app(&scenario),
        request(Method::POST, &uri, Some(ADMIN_TOKEN), Some(json!({ "reason": "no coincide monto" }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "rejected");
    assert_eq!(
        scenario.order(first.id).await.rejection_reason.as_deref(),
        Some("no coincide monto")
    );

    let uri = format!("/api/admin/transfers/{}/reject", second.id);
    let (status, _) = send(app(&scenario), request(Method::POST, &uri, Some(ADMIN_TOKEN), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(scenario.ticket("00060").status, TicketStatus::Available);
}

#[tokio::test]
async fn test_dashboard_is_not_cacheable() {
    let scenario = Scenario::new();

    let response = app(&scenario)
        .oneshot(request(Method::GET, "/api/admin/dashboard", Some(ADMIN_TOKEN), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-store");
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["dashboard"]["total"], 100);
    assert_eq!(body["dashboard"]["revenue"]["total"], "0.00");
}

#[tokio::test]
async fn test_review_queue_and_bad_status() {
    let scenario = Scenario::new();
    let order = scenario.transfer_order(OrderStatus::PendingApproval);

    let (status, body) = send(
        app(&scenario),
        request(Method::GET, "/api/admin/transfers", Some(ADMIN_TOKEN), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["orders"][0]["id"], order.id.to_string());
    assert_eq!(
        body["orders"][0]["proof_url"],
        "https://storage.example.test/proofs/o1.jpg?ttl=600"
    );

    let (status, _) = send(
        app(&scenario),
        request(Method::GET, "/api/admin/transfers?status=paid", Some(ADMIN_TOKEN), None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_order_detail_of_unknown_order_is_not_found() {
    let scenario = Scenario::new();
    let uri = format!("/api/admin/orders/{}", uuid::Uuid::new_v4());

    let (status, body) = send(app(&scenario), request(Method::GET, &uri, Some(ADMIN_TOKEN), None)).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

// ============================================================================
// Buyer routes
// ============================================================================

#[tokio::test]
async fn test_create_order() {
    let scenario = Scenario::new();
    let body = json!({
        "raffle_id": scenario.raffle_id.to_string(),
        "client_id": scenario.client.id.to_string(),
        "numbers": ["00007", "00008"],
        "payment_method": "transfer",
    });

    let (status, body) = send(app(&scenario), request(Method::POST, "/api/orders", None, Some(body))).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["order"]["status"], "pending");
    assert_eq!(body["order"]["total"], "2.00");
    assert!(body["message"].as_str().unwrap().starts_with("Tus boletos"));
    assert_eq!(scenario.ticket("00007").status, TicketStatus::Reserved);
}

#[tokio::test]
async fn test_create_order_needs_exactly_one_selection() {
    let scenario = Scenario::new();
    let body = json!({
        "raffle_id": scenario.raffle_id.to_string(),
        "client_id": scenario.client.id.to_string(),
        "quantity": 2,
        "numbers": ["00007"],
        "payment_method": "card",
    });

    let (status, body) = send(app(&scenario), request(Method::POST, "/api/orders", None, Some(body))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
    assert_eq!(body["message"], "Revisa los datos enviados e inténtalo de nuevo.");
}

#[tokio::test]
async fn test_taken_tickets_conflict_is_localized() {
    let scenario = Scenario::new();
    scenario.transfer_order(OrderStatus::Pending);
    let body = json!({
        "raffle_id": scenario.raffle_id.to_string(),
        "client_id": scenario.client.id.to_string(),
        "numbers": ["00012"],
        "payment_method": "transfer",
    });

    let (status, spanish) = send(
        app(&scenario),
        request(Method::POST, "/api/orders", None, Some(body.clone())),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(spanish["success"], false);
    assert_eq!(
        spanish["message"],
        "Algunos boletos ya no están disponibles. Elige otros e inténtalo de nuevo."
    );

    let mut req = request(Method::POST, "/api/orders", None, Some(body));
    req.headers_mut().insert(header::ACCEPT_LANGUAGE, "en".parse().unwrap());
    let (status, english) = send(app(&scenario), req).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(
        english["message"],
        "Some tickets are no longer available. Pick others and try again."
    );
    assert_eq!(english["error"], spanish["error"]);
}

#[tokio::test]
async fn test_notice_on_completed_order_is_localized_conflict() {
    let scenario = Scenario::new();
    let order = scenario.transfer_order(OrderStatus::Completed);
    let uri = format!("/api/orders/{}/transfer-notify", order.id);
    let claim = json!({ "email": "ana.perez@example.com" });

    let (status, body) = send(
        app(&scenario),
        request(Method::POST, &uri, None, Some(claim.clone())),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");
    assert_eq!(body["message"], "Esta orden ya no admite este cambio.");

    let mut req = request(Method::POST, &uri, None, Some(claim));
    req.headers_mut()
        .insert(header::ACCEPT_LANGUAGE, "en-GB".parse().unwrap());
    let (status, body) = send(app(&scenario), req).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["message"], "This order no longer accepts this change.");
}

#[tokio::test]
async fn test_transfer_notice_is_localized() {
    let scenario = Scenario::new();
    let order = scenario.transfer_order(OrderStatus::Pending);
    let uri = format!("/api/orders/{}/transfer-notify", order.id);
    let mut req = request(Method::POST, &uri, None, Some(json!({ "email": "ana.perez@example.com" })));
    req.headers_mut()
        .insert(header::ACCEPT_LANGUAGE, "en-US,en;q=0.9".parse().unwrap());

    let (status, body) = send(app(&scenario), req).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");
    assert_eq!(
        body["message"],
        "We noted your transfer. Upload the receipt so we can review it."
    );
}

#[tokio::test]
async fn test_transfer_notice_with_wrong_contact_is_forbidden() {
    let scenario = Scenario::new();
    let order = scenario.transfer_order(OrderStatus::Pending);
    let uri = format!("/api/orders/{}/transfer-notify", order.id);

    let (status, body) = send(
        app(&scenario),
        request(Method::POST, &uri, None, Some(json!({ "phone": "0990000000" }))),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");
    assert_eq!(body["message"], "Los datos de contacto no coinciden con los de la orden.");
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let scenario = Scenario::new();
    let order = scenario.transfer_order(OrderStatus::Pending);
    let uri = format!("/api/orders/{}/transfer-notify", order.id);
    let req = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let (status, body) = send(app(&scenario), req).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_card_flow_over_http() {
    let scenario = Scenario::new();
    let order = scenario.card_order();

    let uri = format!("/api/orders/{}/card-checkout", order.id);
    let (status, body) = send(app(&scenario), request(Method::POST, &uri, None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["payment_url"], format!("https://pay.example.test/{}", order.id));

    scenario
        .payments
        .answer(Ok(raffle::payment_gateway::ChargeStatus::Approved {
            transaction_id: Some("tx-9".to_string()),
        }));
    let uri = format!("/api/orders/{}/card-confirm", order.id);
    let (status, body) = send(
        app(&scenario),
        request(Method::POST, &uri, None, Some(json!({ "id": "pp-ref" }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["message"], "¡Pago aprobado! Tus boletos están confirmados.");
}

#[tokio::test]
async fn test_sold_counts_endpoint() {
    let scenario = Scenario::new();
    let order = scenario.transfer_order(OrderStatus::PendingApproval);
    scenario
        .reconciler()
        .approve_transfer(order.id, &scenario.admin)
        .await
        .unwrap();
    let uri = format!("/api/raffles/sold?ids={}", scenario.raffle_id);

    let (status, body) = send(app(&scenario), request(Method::GET, &uri, None, None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["counts"][scenario.raffle_id.to_string()], 2);

    let (status, _) = send(app(&scenario), request(Method::GET, "/api/raffles/sold?ids=", None, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
