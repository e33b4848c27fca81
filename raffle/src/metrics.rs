//! Business metrics for the raffle order service.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `raffle_orders_total{status}` - Orders created at intake, by initial status
//! - `raffle_transitions_total{action,outcome}` - Lifecycle transitions by outcome
//! - `raffle_partial_failures_total{step}` - Transitions that stopped partway
//! - `raffle_provider_calls_total{outcome}` - Payment provider calls

use crate::error::{ReconcileError, Step};
use crate::types::OrderStatus;
use axum::{Router, routing::get};
use metrics::describe_counter;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Initialize and register all business metrics descriptions.
///
/// This should be called once at application startup, before any metrics are recorded.
pub fn register_business_metrics() {
    describe_counter!(
        "raffle_orders_total",
        "Orders created at intake, by initial status"
    );
    describe_counter!(
        "raffle_transitions_total",
        "Order lifecycle transitions by action and outcome"
    );
    describe_counter!(
        "raffle_partial_failures_total",
        "Transitions that stopped after some writes, by failed step"
    );
    describe_counter!(
        "raffle_provider_calls_total",
        "Payment provider calls by outcome"
    );

    tracing::info!("Business metrics registered");
}

/// Record a new order.
pub fn record_order_created(status: OrderStatus) {
    metrics::counter!("raffle_orders_total", "status" => status.as_str()).increment(1);
}

/// Record the outcome of a transition.
pub fn record_transition<T>(action: &'static str, result: &Result<T, ReconcileError>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(err) => err.kind(),
    };
    metrics::counter!("raffle_transitions_total", "action" => action, "outcome" => outcome).increment(1);
    if let Err(ReconcileError::PartialFailure { step, .. }) = result {
        record_partial_failure(*step);
    }
}

/// Record a transition that stopped partway.
pub fn record_partial_failure(step: Step) {
    metrics::counter!("raffle_partial_failures_total", "step" => step.as_str()).increment(1);
}

/// Record a payment provider call.
pub fn record_provider_call(outcome: &'static str) {
    metrics::counter!("raffle_provider_calls_total", "outcome" => outcome).increment(1);
}

/// Install the Prometheus recorder.
///
/// # Errors
///
/// Fails if another recorder is already installed.
pub fn install_prometheus() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_business_metrics();
    Ok(handle)
}

/// Router serving `GET /metrics` in the Prometheus text format, meant for
/// its own listener.
pub fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    )
}
