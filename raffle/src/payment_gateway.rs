//! Card payment provider gateway.
//!
//! Orders paid by card go through a hosted payment page: the service
//! prepares a charge, the buyer pays on the provider's page, and the service
//! later asks the provider for the outcome. [`PayPhoneGateway`] talks to the
//! `PayPhone` button API; [`DisabledPaymentGateway`] stands in when card
//! payments are switched off.

use crate::config::PayPhoneConfig;
use crate::types::{Money, OrderId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Payment gateway result
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Payment gateway error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The provider did not answer within the time budget.
    #[error("payment provider timed out after {0:?}")]
    Timeout(Duration),

    /// The request never produced a usable answer (connection, TLS, 5xx).
    #[error("payment provider unreachable: {0}")]
    Transport(String),

    /// The provider refused the request.
    #[error("payment provider rejected the request ({status}): {message}")]
    Rejected {
        /// HTTP status returned
        status: u16,
        /// Provider message
        message: String,
    },

    /// The provider answered with a body we cannot read.
    #[error("unexpected payment provider response: {0}")]
    InvalidResponse(String),

    /// Card payments are switched off.
    #[error("card payments are disabled")]
    Disabled,
}

/// Charge to prepare on the hosted payment page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    /// Our order; sent as the client transaction id
    pub order_id: OrderId,
    /// Amount to charge
    pub amount: Money,
    /// Free-text reference shown to the buyer
    pub reference: String,
}

/// A prepared charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChargeCreated {
    /// Provider-side payment id
    pub provider_reference: String,
    /// Hosted page the buyer is sent to
    pub payment_url: String,
}

/// Outcome of a charge as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeStatus {
    /// Money captured
    Approved {
        /// Provider transaction id
        transaction_id: Option<String>,
    },
    /// Buyer has not finished
    Pending,
    /// Declined or abandoned
    Canceled {
        /// Provider reason
        reason: String,
    },
}

/// Hosted-payment-page provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Prepare a charge and get the page the buyer pays on.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] if the provider is unreachable or refuses.
    async fn create_charge(&self, request: &ChargeRequest) -> GatewayResult<ChargeCreated>;

    /// Ask the provider how a charge ended.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] if the provider is unreachable or refuses.
    async fn query_status(&self, provider_reference: &str, order_id: OrderId) -> GatewayResult<ChargeStatus>;
}

/// Run a provider call under a time budget.
///
/// # Errors
///
/// Returns [`GatewayError::Timeout`] when the budget runs out.
pub async fn with_timeout<T, F>(budget: Duration, call: F) -> GatewayResult<T>
where
    F: Future<Output = GatewayResult<T>>,
{
    tokio::time::timeout(budget, call)
        .await
        .map_err(|_| GatewayError::Timeout(budget))?
}

/// `PayPhone` button API client.
#[derive(Clone, Debug)]
pub struct PayPhoneGateway {
    http_client: reqwest::Client,
    base_url: String,
    token: String,
    store_id: Option<String>,
    response_url: String,
    cancellation_url: String,
    timeout: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PrepareBody<'a> {
    amount: u64,
    amount_without_tax: u64,
    currency: &'static str,
    client_transaction_id: String,
    reference: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    store_id: Option<&'a str>,
    response_url: &'a str,
    cancellation_url: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrepareResponse {
    payment_id: serde_json::Value,
    pay_with_card: Option<String>,
    pay_with_pay_phone: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmBody<'a> {
    id: &'a str,
    client_tx_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfirmResponse {
    status_code: Option<i64>,
    transaction_status: Option<String>,
    transaction_id: Option<serde_json::Value>,
    message: Option<String>,
}

/// `PayPhone` status code of an approved transaction
const STATUS_APPROVED: i64 = 3;

/// `PayPhone` status code of a canceled transaction
const STATUS_CANCELED: i64 = 2;

impl PayPhoneGateway {
    /// Creates a client from configuration.
    #[must_use]
    pub fn new(config: &PayPhoneConfig) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            store_id: config.store_id.clone(),
            response_url: config.response_url.clone(),
            cancellation_url: config.cancellation_url.clone(),
            timeout: config.timeout(),
        }
    }

    async fn post<B: Serialize + Sync, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> GatewayResult<R> {
        let response = self
            .http_client
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(GatewayError::Transport(format!("HTTP {status}")));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<R>()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }
}

fn json_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl PaymentGateway for PayPhoneGateway {
    async fn create_charge(&self, request: &ChargeRequest) -> GatewayResult<ChargeCreated> {
        let body = PrepareBody {
            amount: request.amount.cents(),
            amount_without_tax: request.amount.cents(),
            currency: "USD",
            client_transaction_id: request.order_id.to_string(),
            reference: &request.reference,
            store_id: self.store_id.as_deref(),
            response_url: &self.response_url,
            cancellation_url: &self.cancellation_url,
        };

        let prepared: PrepareResponse =
            with_timeout(self.timeout, self.post("/api/button/Prepare", &body)).await?;

        let provider_reference = json_text(&prepared.payment_id)
            .ok_or_else(|| GatewayError::InvalidResponse("missing paymentId".to_string()))?;
        let payment_url = prepared
            .pay_with_card
            .or(prepared.pay_with_pay_phone)
            .ok_or_else(|| GatewayError::InvalidResponse("missing payment URL".to_string()))?;

        tracing::info!(
            order_id = %request.order_id,
            amount = request.amount.cents(),
            provider_reference = %provider_reference,
            "PayPhone charge prepared"
        );

        Ok(ChargeCreated {
            provider_reference,
            payment_url,
        })
    }

    async fn query_status(&self, provider_reference: &str, order_id: OrderId) -> GatewayResult<ChargeStatus> {
        let body = ConfirmBody {
            id: provider_reference,
            client_tx_id: order_id.to_string(),
        };

        let confirmed: ConfirmResponse =
            with_timeout(self.timeout, self.post("/api/button/V2/Confirm", &body)).await?;

        let status_text = confirmed.transaction_status.as_deref().unwrap_or_default();
        let status = match confirmed.status_code {
            Some(STATUS_APPROVED) => ChargeStatus::Approved {
                transaction_id: confirmed.transaction_id.as_ref().and_then(json_text),
            },
            Some(STATUS_CANCELED) => ChargeStatus::Canceled {
                reason: confirmed
                    .message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| status_text.to_string()),
            },
            _ if status_text.eq_ignore_ascii_case("approved") => ChargeStatus::Approved {
                transaction_id: confirmed.transaction_id.as_ref().and_then(json_text),
            },
            _ => ChargeStatus::Pending,
        };

        tracing::debug!(
            order_id = %order_id,
            provider_reference = %provider_reference,
            ?status,
            "PayPhone charge status"
        );

        Ok(status)
    }
}

/// Stand-in when card payments are switched off.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledPaymentGateway;

#[async_trait]
impl PaymentGateway for DisabledPaymentGateway {
    async fn create_charge(&self, _request: &ChargeRequest) -> GatewayResult<ChargeCreated> {
        Err(GatewayError::Disabled)
    }

    async fn query_status(&self, _provider_reference: &str, _order_id: OrderId) -> GatewayResult<ChargeStatus> {
        Err(GatewayError::Disabled)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timeout_is_distinct_error() {
        let result: GatewayResult<()> = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert_eq!(result.unwrap_err(), GatewayError::Timeout(Duration::from_millis(10)));
    }

    #[tokio::test]
    async fn test_fast_call_passes_through() {
        let result = with_timeout(Duration::from_secs(1), async { Ok::<_, GatewayError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_disabled_gateway() {
        let gateway = DisabledPaymentGateway;
        let err = gateway.query_status("x", OrderId::new()).await.unwrap_err();
        assert_eq!(err, GatewayError::Disabled);
    }

    #[test]
    fn test_prepare_body_shape() {
        let order_id = OrderId::new();
        let body = PrepareBody {
            amount: 200,
            amount_without_tax: 200,
            currency: "USD",
            client_transaction_id: order_id.to_string(),
            reference: "Rifa",
            store_id: None,
            response_url: "https://x/ok",
            cancellation_url: "https://x/cancel",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["amount"], 200);
        assert_eq!(json["amountWithoutTax"], 200);
        assert_eq!(json["clientTransactionId"], order_id.to_string());
        assert!(json.get("storeId").is_none());
    }
}
