//! Gateway doubles that record what the core asked for.

use async_trait::async_trait;
use raffle::notify::{NotifyError, Notifier};
use raffle::payment_gateway::{
    ChargeCreated, ChargeRequest, ChargeStatus, GatewayError, GatewayResult, PaymentGateway,
};
use raffle::storage::{ProofStorage, StorageError};
use raffle::types::OrderId;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Payment provider answering from a script.
///
/// `query_status` pops the next scripted answer and answers `Pending` once
/// the script is empty. `create_charge` always succeeds unless
/// [`Self::fail_charges`] was called.
#[derive(Debug, Default)]
pub struct ScriptedPaymentGateway {
    statuses: Mutex<VecDeque<GatewayResult<ChargeStatus>>>,
    charge_error: Mutex<Option<GatewayError>>,
    charges: Mutex<Vec<ChargeRequest>>,
    queries: Mutex<Vec<(String, OrderId)>>,
}

impl ScriptedPaymentGateway {
    /// Empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the answer of the next status query.
    pub fn answer(&self, status: GatewayResult<ChargeStatus>) {
        self.statuses.lock().unwrap().push_back(status);
    }

    /// Make every `create_charge` fail with `error`.
    pub fn fail_charges(&self, error: GatewayError) {
        *self.charge_error.lock().unwrap() = Some(error);
    }

    /// Charges requested so far.
    #[must_use]
    pub fn charges(&self) -> Vec<ChargeRequest> {
        self.charges.lock().unwrap().clone()
    }

    /// Status queries made so far.
    #[must_use]
    pub fn queries(&self) -> Vec<(String, OrderId)> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for ScriptedPaymentGateway {
    async fn create_charge(&self, request: &ChargeRequest) -> GatewayResult<ChargeCreated> {
        self.charges.lock().unwrap().push(request.clone());
        if let Some(error) = self.charge_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(ChargeCreated {
            provider_reference: format!("pp-{}", request.order_id),
            payment_url: format!("https://pay.example.test/{}", request.order_id),
        })
    }

    async fn query_status(&self, provider_reference: &str, order_id: OrderId) -> GatewayResult<ChargeStatus> {
        self.queries
            .lock()
            .unwrap()
            .push((provider_reference.to_string(), order_id));
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(ChargeStatus::Pending))
    }
}

/// Notifier that records dispatches and can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<OrderId>>,
    failing: Mutex<bool>,
}

impl RecordingNotifier {
    /// Notifier that succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every dispatch fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    /// Orders confirmed so far.
    #[must_use]
    pub fn sent(&self) -> Vec<OrderId> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_order_confirmation(&self, order_id: OrderId) -> Result<(), NotifyError> {
        if *self.failing.lock().unwrap() {
            return Err(NotifyError("mail relay down".to_string()));
        }
        self.sent.lock().unwrap().push(order_id);
        Ok(())
    }
}

/// Storage that signs every path as `https://storage.example.test/<path>`.
#[derive(Debug, Default)]
pub struct StaticProofStorage {
    failing: Mutex<bool>,
    signed: Mutex<Vec<String>>,
}

impl StaticProofStorage {
    /// Storage that signs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make signing fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    /// Paths signed so far.
    #[must_use]
    pub fn signed(&self) -> Vec<String> {
        self.signed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProofStorage for StaticProofStorage {
    async fn signed_url(&self, path: &str, ttl: Duration) -> Result<String, StorageError> {
        if *self.failing.lock().unwrap() {
            return Err(StorageError("bucket unavailable".to_string()));
        }
        self.signed.lock().unwrap().push(path.to_string());
        Ok(format!("https://storage.example.test/{path}?ttl={}", ttl.as_secs()))
    }
}
