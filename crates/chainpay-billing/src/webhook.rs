//! Webhook Dispatch
//!
//! Outbound notifications to merchant-registered endpoints. Delivery happens
//! on spawned tasks; `trigger` returns as soon as deliveries are scheduled and
//! never reports failure to the operation that caused the event.
//!
//! Each POST carries `X-Chainpay-Signature: t=<unix>,v1=<hex>` where the hex
//! digest is HMAC-SHA256 over `"<t>.<body>"` keyed with the endpoint secret.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::model::WebhookEndpoint;
use crate::store::BillingStore;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the delivery signature
pub const SIGNATURE_HEADER: &str = "X-Chainpay-Signature";

/// Notification kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    PaymentSucceeded,
    SubscriptionCreated,
    SubscriptionCanceled,
    SubscriptionRenewed,
}

impl WebhookEventType {
    pub const fn as_str(self) -> &'static str {
        match self {
            WebhookEventType::PaymentSucceeded => "payment_succeeded",
            WebhookEventType::SubscriptionCreated => "subscription_created",
            WebhookEventType::SubscriptionCanceled => "subscription_canceled",
            WebhookEventType::SubscriptionRenewed => "subscription_renewed",
        }
    }
}

impl std::fmt::Display for WebhookEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notification addressed to one merchant
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub merchant_id: Uuid,
    pub event_type: WebhookEventType,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl WebhookEvent {
    pub fn new(merchant_id: Uuid, event_type: WebhookEventType, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            merchant_id,
            event_type,
            payload,
            created_at: Utc::now(),
        }
    }
}

/// Wire body POSTed to endpoints
#[derive(Debug, Serialize)]
struct DeliveryBody<'a> {
    event_type: WebhookEventType,
    payload: &'a Value,
    created_at: DateTime<Utc>,
}

/// Best-effort notification sink
#[async_trait]
pub trait WebhookDispatcher: Send + Sync {
    /// Schedule delivery; never fails the caller
    async fn trigger(&self, event: WebhookEvent);
}

// ============================================================================
// Signing
// ============================================================================

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Signature header missing")]
    Missing,

    #[error("Signature header malformed")]
    Malformed,

    #[error("Signature timestamp outside tolerance")]
    Expired,

    #[error("Signature mismatch")]
    Mismatch,
}

fn mac_for(secret: &str, timestamp: i64, body: &[u8]) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("hmac key length is unrestricted"));
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    mac
}

/// Build the signature header value for `body`
pub fn sign_payload(secret: &str, timestamp: i64, body: &[u8]) -> String {
    let digest = mac_for(secret, timestamp, body).finalize().into_bytes();
    format!("t={timestamp},v1={}", hex::encode(digest))
}

/// Check a signature header against `body`
///
/// `tolerance_secs` bounds the distance between the signed timestamp and `now`.
pub fn verify_signature(
    secret: &str,
    header: Option<&str>,
    body: &[u8],
    tolerance_secs: i64,
    now: i64,
) -> Result<(), SignatureError> {
    let header = header.ok_or(SignatureError::Missing)?;

    let mut timestamp = None;
    let mut signature = None;
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signature = hex::decode(value).ok(),
            _ => {}
        }
    }

    let (timestamp, signature) = timestamp.zip(signature).ok_or(SignatureError::Malformed)?;

    if now.abs_diff(timestamp) > tolerance_secs.unsigned_abs() {
        return Err(SignatureError::Expired);
    }

    mac_for(secret, timestamp, body)
        .verify_slice(&signature)
        .map_err(|_| SignatureError::Mismatch)
}

// ============================================================================
// HTTP dispatcher
// ============================================================================

/// Delivery settings
#[derive(Clone, Debug)]
pub struct WebhookConfig {
    /// Per-attempt request timeout
    pub timeout_ms: u64,
    pub max_attempts: u32,
    /// First retry delay; doubles per attempt
    pub backoff_ms: u64,
    /// Fallback target for merchants without registered endpoints
    pub default_url: Option<String>,
    pub default_secret: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 3_000,
            max_attempts: 3,
            backoff_ms: 500,
            default_url: None,
            default_secret: String::new(),
        }
    }
}

impl WebhookConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            timeout_ms: env_parse("WEBHOOK_TIMEOUT_MS").unwrap_or(defaults.timeout_ms),
            max_attempts: env_parse("WEBHOOK_MAX_ATTEMPTS")
                .unwrap_or(defaults.max_attempts)
                .max(1),
            backoff_ms: env_parse("WEBHOOK_BACKOFF_MS").unwrap_or(defaults.backoff_ms),
            default_url: std::env::var("WEBHOOK_DEFAULT_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            default_secret: std::env::var("WEBHOOK_DEFAULT_SECRET").unwrap_or_default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Signs and POSTs events to each registered endpoint
#[derive(Clone)]
pub struct HttpWebhookDispatcher {
    store: Arc<dyn BillingStore>,
    http: reqwest::Client,
    config: WebhookConfig,
}

impl HttpWebhookDispatcher {
    pub fn new(store: Arc<dyn BillingStore>, config: WebhookConfig) -> Self {
        Self {
            store,
            http: reqwest::Client::new(),
            config,
        }
    }

    async fn targets(&self, merchant_id: Uuid) -> Vec<(String, String)> {
        let endpoints = match self.store.webhook_endpoints(merchant_id).await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                tracing::warn!(merchant_id = %merchant_id, "Webhook endpoint lookup failed: {}", e);
                return Vec::new();
            }
        };

        if endpoints.is_empty() {
            return self
                .config
                .default_url
                .iter()
                .map(|url| (url.clone(), self.config.default_secret.clone()))
                .collect();
        }

        endpoints
            .into_iter()
            .map(|WebhookEndpoint { url, secret, .. }| (url, secret))
            .collect()
    }

    /// Deliver one event to one URL with retries; true once a 2xx is received
    pub async fn deliver(&self, url: &str, secret: &str, event: &WebhookEvent) -> bool {
        let body = DeliveryBody {
            event_type: event.event_type,
            payload: &event.payload,
            created_at: event.created_at,
        };
        let body = match serde_json::to_vec(&body) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(event_id = %event.id, "Webhook body serialization failed: {}", e);
                return false;
            }
        };

        let timeout = Duration::from_millis(self.config.timeout_ms);
        let mut backoff = Duration::from_millis(self.config.backoff_ms);

        for attempt in 1..=self.config.max_attempts {
            let mut request = self
                .http
                .post(url)
                .timeout(timeout)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.clone());
            if !secret.is_empty() {
                request = request.header(
                    SIGNATURE_HEADER,
                    sign_payload(secret, Utc::now().timestamp(), &body),
                );
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::info!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        url,
                        attempt,
                        "Webhook delivered"
                    );
                    return true;
                }
                Ok(response) => {
                    tracing::warn!(
                        event_id = %event.id,
                        url,
                        attempt,
                        status = %response.status(),
                        "Webhook rejected"
                    );
                }
                Err(e) => {
                    tracing::warn!(event_id = %event.id, url, attempt, "Webhook attempt failed: {}", e);
                }
            }

            if attempt < self.config.max_attempts {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }

        tracing::error!(
            event_id = %event.id,
            event_type = %event.event_type,
            url,
            "Webhook delivery abandoned"
        );
        false
    }
}

#[async_trait]
impl WebhookDispatcher for HttpWebhookDispatcher {
    async fn trigger(&self, event: WebhookEvent) {
        let targets = self.targets(event.merchant_id).await;
        if targets.is_empty() {
            tracing::debug!(
                merchant_id = %event.merchant_id,
                event_type = %event.event_type,
                "No webhook endpoints registered"
            );
            return;
        }

        let event = Arc::new(event);
        for (url, secret) in targets {
            let dispatcher = self.clone();
            let event = Arc::clone(&event);
            tokio::spawn(async move {
                dispatcher.deliver(&url, &secret, &event).await;
            });
        }
    }
}

// ============================================================================
// Recording dispatcher
// ============================================================================

/// Keeps triggered events in memory
#[derive(Default)]
pub struct RecordingDispatcher {
    events: Mutex<Vec<WebhookEvent>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<WebhookEvent> {
        self.events.lock().await.clone()
    }

    pub async fn count(&self, event_type: WebhookEventType) -> usize {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

#[async_trait]
impl WebhookDispatcher for RecordingDispatcher {
    async fn trigger(&self, event: WebhookEvent) {
        tracing::debug!(event_type = %event.event_type, "Recorded webhook");
        self.events.lock().await.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merchants::MerchantDirectory;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[test]
    fn test_sign_and_verify() {
        let body = br#"{"event_type":"payment_succeeded"}"#;
        let header = sign_payload("whsec_test", 1_700_000_000, body);

        assert!(header.starts_with("t=1700000000,v1="));
        assert_eq!(
            verify_signature("whsec_test", Some(&header), body, 300, 1_700_000_100),
            Ok(())
        );
    }

    #[test]
    fn test_verify_rejects_tampering() {
        let header = sign_payload("secret", 1_700_000_000, b"original");

        assert_eq!(
            verify_signature("secret", Some(&header), b"tampered", 300, 1_700_000_000),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify_signature("other", Some(&header), b"original", 300, 1_700_000_000),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify_signature("secret", Some(&header), b"original", 300, 1_700_000_600),
            Err(SignatureError::Expired)
        );
        assert_eq!(
            verify_signature("secret", Some("garbage"), b"original", 300, 1_700_000_000),
            Err(SignatureError::Malformed)
        );
        assert_eq!(
            verify_signature("secret", None, b"original", 300, 1_700_000_000),
            Err(SignatureError::Missing)
        );
    }

    #[test]
    fn test_verify_rejects_extreme_timestamps() {
        for header in [
            "t=-9223372036854775808,v1=00",
            "t=9223372036854775807,v1=00",
        ] {
            assert_eq!(
                verify_signature("secret", Some(header), b"x", 300, 1_700_000_000),
                Err(SignatureError::Expired)
            );
        }
        assert_eq!(
            verify_signature("secret", Some("t=0,v1=00"), b"x", 300, i64::MIN),
            Err(SignatureError::Expired)
        );
    }

    #[test]
    fn test_event_type_wire_names() {
        assert_eq!(
            serde_json::to_value(WebhookEventType::SubscriptionCanceled).unwrap(),
            "subscription_canceled"
        );
        assert_eq!(WebhookEventType::PaymentSucceeded.to_string(), "payment_succeeded");
    }

    #[tokio::test]
    async fn test_recording_dispatcher_counts() {
        let dispatcher = RecordingDispatcher::new();
        let merchant = Uuid::new_v4();
        dispatcher
            .trigger(WebhookEvent::new(merchant, WebhookEventType::PaymentSucceeded, json!({})))
            .await;
        dispatcher
            .trigger(WebhookEvent::new(merchant, WebhookEventType::SubscriptionCreated, json!({})))
            .await;

        assert_eq!(dispatcher.count(WebhookEventType::PaymentSucceeded).await, 1);
        assert_eq!(dispatcher.events().await.len(), 2);
    }

    #[tokio::test]
    async fn test_no_endpoints_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let dispatcher = HttpWebhookDispatcher::new(store, WebhookConfig::default());
        let event = WebhookEvent::new(Uuid::new_v4(), WebhookEventType::PaymentSucceeded, json!({}));

        let triggered =
            tokio::time::timeout(Duration::from_millis(200), dispatcher.trigger(event)).await;
        assert!(triggered.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_does_not_block_trigger() {
        let store = Arc::new(MemoryStore::new());
        let merchant = MerchantDirectory::new(store.clone())
            .resolve_or_create("0xmm")
            .await
            .unwrap();
        store
            .insert_webhook_endpoint(WebhookEndpoint::new(merchant.id, "http://127.0.0.1:9/hook", "s"))
            .await
            .unwrap();

        let config = WebhookConfig {
            timeout_ms: 100,
            max_attempts: 2,
            backoff_ms: 10,
            ..WebhookConfig::default()
        };
        let dispatcher = HttpWebhookDispatcher::new(store, config);
        let event = WebhookEvent::new(merchant.id, WebhookEventType::PaymentSucceeded, json!({}));

        let triggered =
            tokio::time::timeout(Duration::from_millis(200), dispatcher.trigger(event.clone())).await;
        assert!(triggered.is_ok());

        assert!(!dispatcher.deliver("http://127.0.0.1:9/hook", "s", &event).await);
    }
}
