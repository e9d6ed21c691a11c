//! Outbound webhook notification.
//!
//! Delivery is best-effort and fire-and-forget: a failed POST is logged
//! and never retried, and a notification failure never fails the dispatch
//! cycle that produced it.

pub mod cache;
pub mod throttle;

pub use cache::SubscriptionCache;
pub use throttle::{AlertThrottle, DEFAULT_ALERT_WINDOW};

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

use crate::domain::{
    AppError, BalanceAlert, NetworkError, QueueStore, QueuedTransaction, WebhookError,
    WebhookEventKind, WebhookSubscription,
};

type HmacSha256 = Hmac<Sha256>;

/// Process-wide throttle key for low-balance alerts
const BALANCE_ALERT_KEY: &str = "wallet_balance";

/// Compute the hex HMAC-SHA-256 signature over `{timestamp}.{body}`.
///
/// `body` must be the exact JSON string delivered in the request; the
/// receiver recomputes the digest over the same bytes.
#[must_use]
pub fn generate_signature(body: &str, timestamp: i64, secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(format!("{}.{}", timestamp, body).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Builds signed notifications and delivers them to subscribers
pub struct WebhookNotifier {
    queue_store: Arc<dyn QueueStore>,
    cache: Arc<SubscriptionCache>,
    throttle: AlertThrottle,
    http_client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(
        queue_store: Arc<dyn QueueStore>,
        cache: Arc<SubscriptionCache>,
        throttle: AlertThrottle,
    ) -> Result<Self, AppError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Network(NetworkError::Connection(e.to_string())))?;
        Ok(Self {
            queue_store,
            cache,
            throttle,
            http_client,
        })
    }

    /// Notify subscribers for the current state of the given rows.
    /// Errors are logged per delivery and never propagated.
    #[instrument(skip(self, queue_ids), fields(count = queue_ids.len()))]
    pub async fn notify_queue_ids(&self, queue_ids: &[String]) {
        if queue_ids.is_empty() {
            return;
        }
        let records = match self.queue_store.load_transactions(queue_ids).await {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "Failed to load transactions for webhook notification");
                return;
            }
        };
        self.notify_transactions(&records).await;
    }

    /// Notify subscribers for the given record snapshots.
    #[instrument(skip(self, records), fields(count = records.len()))]
    pub async fn notify_transactions(&self, records: &[QueuedTransaction]) {
        for record in records {
            let subscriptions = match self.subscriptions_for(record).await {
                Ok(subscriptions) => subscriptions,
                Err(e) => {
                    error!(queue_id = %record.queue_id, error = %e, "Failed to resolve webhook subscriptions");
                    continue;
                }
            };

            if subscriptions.is_empty() {
                debug!(queue_id = %record.queue_id, "No webhook set or active, skipping webhook send");
                continue;
            }

            let body = match serde_json::to_value(record) {
                Ok(body) => body,
                Err(e) => {
                    error!(queue_id = %record.queue_id, error = %e, "Failed to serialize webhook body");
                    continue;
                }
            };

            for subscription in &subscriptions {
                self.deliver(subscription, &body).await;
            }
        }
    }

    /// Deliver a low-balance alert, subject to the process-wide throttle.
    #[instrument(skip(self, alert), fields(wallet = %alert.wallet_address, chain_id = alert.chain_id))]
    pub async fn notify_balance(&self, alert: &BalanceAlert) {
        if !self.throttle.check(BALANCE_ALERT_KEY) {
            warn!("Low balance notification sent within the last window, skipping");
            return;
        }

        let subscriptions = match self.cache.get(WebhookEventKind::WalletBalance).await {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                error!(error = %e, "Failed to resolve balance webhook subscriptions");
                return;
            }
        };
        if subscriptions.is_empty() {
            debug!("No webhook set, skipping webhook send");
            return;
        }

        let body = match serde_json::to_value(alert) {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "Failed to serialize balance alert");
                return;
            }
        };

        for subscription in &subscriptions {
            self.deliver(subscription, &body).await;
        }
    }

    /// Pick subscriptions for a record: the catch-all kind wins; otherwise
    /// the explicit status-to-event mapping applies.
    async fn subscriptions_for(
        &self,
        record: &QueuedTransaction,
    ) -> Result<Vec<WebhookSubscription>, AppError> {
        let catch_all = self.cache.get(WebhookEventKind::AllTransactions).await?;
        if !catch_all.is_empty() {
            return Ok(catch_all);
        }
        self.cache.get(record.status.event_kind()).await
    }

    /// POST one notification. Callers log the error; delivery is never
    /// retried.
    async fn try_deliver(
        &self,
        subscription: &WebhookSubscription,
        body: &serde_json::Value,
    ) -> Result<(), WebhookError> {
        let body_string = serde_json::to_string(body)
            .map_err(|e| WebhookError::Delivery(format!("body serialization: {}", e)))?;

        let mut request = self
            .http_client
            .post(&subscription.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::CONTENT_TYPE, "application/json");

        if let Some(secret) = &subscription.secret {
            let timestamp = Utc::now().timestamp();
            let signature = generate_signature(&body_string, timestamp, secret);
            request = request
                .header(reqwest::header::AUTHORIZATION, format!("Bearer {}", secret))
                .header("x-engine-signature", signature)
                .header("x-engine-timestamp", timestamp.to_string());
        }

        let response = request
            .body(body_string)
            .send()
            .await
            .map_err(|e| WebhookError::Delivery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(WebhookError::Delivery(format!(
                "subscriber returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn deliver(&self, subscription: &WebhookSubscription, body: &serde_json::Value) {
        if let Err(e) = self.try_deliver(subscription, body).await {
            error!(url = %subscription.url, error = %e, "Webhook delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_is_reproducible() {
        let body = r#"{"queueId":"q1","status":"submitted"}"#;
        let a = generate_signature(body, 1700000000, "topsecret");
        let b = generate_signature(body, 1700000000, "topsecret");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64, "hex-encoded SHA-256 digest");
    }

    #[test]
    fn test_signature_depends_on_all_inputs() {
        let body = r#"{"queueId":"q1"}"#;
        let base = generate_signature(body, 1700000000, "s1");
        assert_ne!(base, generate_signature(body, 1700000001, "s1"));
        assert_ne!(base, generate_signature(body, 1700000000, "s2"));
        assert_ne!(base, generate_signature(r#"{"queueId":"q2"}"#, 1700000000, "s1"));
    }
}
