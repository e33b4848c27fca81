//! Order confirmation dispatch.
//!
//! Sending is fire-and-forget from the core: a failed dispatch is logged and
//! reported, never turned into a failed transition.

use crate::types::OrderId;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

/// Dispatch failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

/// Sends order confirmation messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send the confirmation for a completed order.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] if the message could not be handed off.
    async fn send_order_confirmation(&self, order_id: OrderId) -> Result<(), NotifyError>;
}

/// Posts `{ "event": "order_confirmed", "order_id": ... }` to a webhook that
/// renders and mails the invoice.
#[derive(Clone, Debug)]
pub struct WebhookNotifier {
    http_client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl WebhookNotifier {
    /// Notifier posting to `url`.
    #[must_use]
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send_order_confirmation(&self, order_id: OrderId) -> Result<(), NotifyError> {
        let response = self
            .http_client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&json!({ "event": "order_confirmed", "order_id": order_id }))
            .send()
            .await
            .map_err(|e| NotifyError(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(NotifyError(format!("webhook answered {}", response.status())))
        }
    }
}

/// Logs dispatches instead of sending them.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn send_order_confirmation(&self, order_id: OrderId) -> Result<(), NotifyError> {
        tracing::info!(order_id = %order_id, "Order confirmation (console notifier)");
        Ok(())
    }
}
