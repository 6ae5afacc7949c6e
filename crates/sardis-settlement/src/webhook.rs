//! Webhook dispatcher: signed, retried, at-least-once delivery.
//!
//! Subscriptions name the events they want; every matching event enqueues
//! a delivery with up to five attempts on an exponential backoff schedule.
//! Bodies are canonical JSON signed with HMAC-SHA256
//! (`X-Sardis-Signature: sha256=<hex>`), and each attempt records status,
//! body, error, and duration for the audit trail.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;

use sardis_mandate::canonical;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Sardis-Signature";
pub const EVENT_HEADER: &str = "X-Sardis-Event";

pub const MAX_ATTEMPTS: u32 = 5;
const BASE_BACKOFF_SECS: i64 = 30;

/// Events the settlement engine emits.
pub mod events {
    pub const PAYMENT_INITIATED: &str = "payment.initiated";
    pub const PAYMENT_SUCCEEDED: &str = "payment.succeeded";
    pub const PAYMENT_FAILED: &str = "payment.failed";
    pub const POLICY_BLOCKED: &str = "policy.blocked";
    pub const RISK_ALERT: &str = "risk.alert";
}

/// Compute the hex HMAC-SHA256 of a body with the subscription secret.
pub fn compute_signature(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time verification of a `sha256=<hex>` signature header.
///
/// The MAC is always computed and the comparison runs over fixed-length
/// digests, so neither invalid hex nor a length mismatch changes timing.
pub fn verify_signature(secret: &[u8], body: &[u8], header_value: &str) -> bool {
    let hex_part = header_value.strip_prefix("sha256=").unwrap_or(header_value);
    let presented = hex::decode(hex_part).unwrap_or_default();

    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    constant_time_eq(&presented, &expected)
}

/// Constant-time byte comparison that does not leak lengths: both inputs
/// are hashed to fixed-length digests before the `subtle` comparison.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use sha2::Digest as _;
    use subtle::ConstantTimeEq as _;
    let ha = Sha256::digest(a);
    let hb = Sha256::digest(b);
    ha.ct_eq(&hb).into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub endpoint_id: String,
    pub url: String,
    /// HMAC secret shared with the receiver.
    #[serde(skip_serializing)]
    pub secret: Vec<u8>,
    /// Event types this endpoint receives; empty means all.
    pub events: Vec<String>,
    pub enabled: bool,
}

impl WebhookSubscription {
    fn wants(&self, event_type: &str) -> bool {
        self.enabled && (self.events.is_empty() || self.events.iter().any(|e| e == event_type))
    }
}

/// Canonical webhook payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub event_id: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub attempted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Exhausted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub delivery_id: String,
    pub endpoint_id: String,
    pub url: String,
    pub event: WebhookEvent,
    pub attempts: Vec<DeliveryAttempt>,
    pub max_attempts: u32,
    pub status: DeliveryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
}

/// Transport seam; the HTTP implementation posts with reqwest, tests
/// script responses.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    /// POST the body; returns `(status_code, response_body)` or a
    /// transport error string.
    async fn post(
        &self,
        url: &str,
        body: &[u8],
        headers: &[(String, String)],
    ) -> Result<(u16, String), String>;
}

pub struct HttpDeliveryTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl Default for HttpDeliveryTransport {
    fn default() -> Self {
        Self { client: reqwest::Client::new(), timeout: Duration::from_secs(10) }
    }
}

impl HttpDeliveryTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeliveryTransport for HttpDeliveryTransport {
    async fn post(
        &self,
        url: &str,
        body: &[u8],
        headers: &[(String, String)],
    ) -> Result<(u16, String), String> {
        let mut request = self
            .client
            .post(url)
            .timeout(self.timeout)
            .header("content-type", "application/json")
            .body(body.to_vec());
        for (name, value) in headers {
            request = request.header(name, value);
        }
        let response = request.send().await.map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok((status, body))
    }
}

/// Validate subscription URLs at registration: non-HTTPS and private
/// targets are logged, not rejected (development endpoints are legitimate).
pub fn warn_on_risky_url(url_str: &str) {
    if !url_str.starts_with("https://") {
        tracing::warn!(url = %url_str, "webhook URL does not use HTTPS");
    }
    if let Ok(parsed) = url::Url::parse(url_str) {
        match parsed.host() {
            Some(url::Host::Ipv4(ip)) => {
                if ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified()
                {
                    tracing::warn!(url = %url_str, "webhook URL targets a private IP");
                }
            }
            Some(url::Host::Domain(domain)) => {
                let d = domain.to_lowercase();
                if d == "localhost" || d.ends_with(".local") || d.ends_with(".internal") {
                    tracing::warn!(url = %url_str, "webhook URL targets a local domain");
                }
            }
            _ => {}
        }
    }
}

/// Dispatcher: fan events out to subscriptions and drive retries.
pub struct WebhookDispatcher {
    subscriptions: DashMap<String, WebhookSubscription>,
    queue: Mutex<Vec<WebhookDelivery>>,
    transport: Arc<dyn DeliveryTransport>,
}

impl WebhookDispatcher {
    pub fn new(transport: Arc<dyn DeliveryTransport>) -> Self {
        Self { subscriptions: DashMap::new(), queue: Mutex::new(Vec::new()), transport }
    }

    pub fn subscribe(&self, subscription: WebhookSubscription) {
        warn_on_risky_url(&subscription.url);
        self.subscriptions
            .insert(subscription.endpoint_id.clone(), subscription);
    }

    pub fn unsubscribe(&self, endpoint_id: &str) {
        self.subscriptions.remove(endpoint_id);
    }

    /// Enqueue an event for every matching subscription. Returns the
    /// number of deliveries created.
    pub fn emit(&self, event_type: &str, data: Value) -> usize {
        let event = WebhookEvent {
            event_id: format!("evt_{}", uuid::Uuid::new_v4().simple()),
            event_type: event_type.to_string(),
            timestamp: Utc::now(),
            data,
        };

        let mut queue = self.queue.lock();
        let mut created = 0;
        for subscription in self.subscriptions.iter() {
            if !subscription.wants(event_type) {
                continue;
            }
            queue.push(WebhookDelivery {
                delivery_id: format!("whd_{}", uuid::Uuid::new_v4().simple()),
                endpoint_id: subscription.endpoint_id.clone(),
                url: subscription.url.clone(),
                event: event.clone(),
                attempts: Vec::new(),
                max_attempts: MAX_ATTEMPTS,
                status: DeliveryStatus::Pending,
                next_retry_at: Some(Utc::now()),
            });
            created += 1;
        }
        if created > 0 {
            tracing::debug!(event_type, created, "webhook deliveries enqueued");
        }
        created
    }

    /// Attempt every due delivery once. Returns the number attempted.
    /// Run from the delivery sweeper; safe to call repeatedly.
    pub async fn process_due(&self) -> usize {
        let now = Utc::now();
        let due: Vec<WebhookDelivery> = {
            let mut queue = self.queue.lock();
            let mut due = Vec::new();
            let mut keep = Vec::new();
            for delivery in queue.drain(..) {
                let is_due = delivery.status == DeliveryStatus::Pending
                    && delivery.next_retry_at.map(|t| t <= now).unwrap_or(true);
                if is_due {
                    due.push(delivery);
                } else {
                    keep.push(delivery);
                }
            }
            *queue = keep;
            due
        };

        let attempted = due.len();
        for mut delivery in due {
            self.attempt(&mut delivery).await;
            self.queue.lock().push(delivery);
        }
        attempted
    }

    /// Deliveries in a given state, newest last.
    pub fn deliveries(&self, status: Option<DeliveryStatus>) -> Vec<WebhookDelivery> {
        self.queue
            .lock()
            .iter()
            .filter(|d| status.map(|s| d.status == s).unwrap_or(true))
            .cloned()
            .collect()
    }

    async fn attempt(&self, delivery: &mut WebhookDelivery) {
        let Some(subscription) = self.subscriptions.get(&delivery.endpoint_id) else {
            // Endpoint was removed; drop the delivery as exhausted.
            delivery.status = DeliveryStatus::Exhausted;
            return;
        };

        let body = match canonical::canonicalize(&delivery.event) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(delivery_id = %delivery.delivery_id, error = %e, "unserializable webhook event");
                delivery.status = DeliveryStatus::Exhausted;
                return;
            }
        };
        let signature = format!("sha256={}", compute_signature(&subscription.secret, &body));
        let headers = vec![
            (SIGNATURE_HEADER.to_string(), signature),
            (EVENT_HEADER.to_string(), delivery.event.event_type.clone()),
        ];

        let start = std::time::Instant::now();
        let result = self.transport.post(&delivery.url, &body, &headers).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let attempt = match &result {
            Ok((status, response_body)) => DeliveryAttempt {
                status_code: Some(*status),
                response_body: Some(response_body.chars().take(1_024).collect()),
                error: None,
                duration_ms,
                attempted_at: Utc::now(),
            },
            Err(error) => DeliveryAttempt {
                status_code: None,
                response_body: None,
                error: Some(error.clone()),
                duration_ms,
                attempted_at: Utc::now(),
            },
        };
        delivery.attempts.push(attempt);

        let succeeded = matches!(result, Ok((status, _)) if (200..300).contains(&status));
        if succeeded {
            delivery.status = DeliveryStatus::Delivered;
            delivery.next_retry_at = None;
            crate::metrics::WEBHOOK_DELIVERIES
                .with_label_values(&["delivered"])
                .inc();
            tracing::debug!(
                delivery_id = %delivery.delivery_id,
                url = %delivery.url,
                "webhook delivered"
            );
        } else if delivery.attempts.len() as u32 >= delivery.max_attempts {
            delivery.status = DeliveryStatus::Exhausted;
            delivery.next_retry_at = None;
            crate::metrics::WEBHOOK_DELIVERIES
                .with_label_values(&["exhausted"])
                .inc();
            tracing::warn!(
                delivery_id = %delivery.delivery_id,
                url = %delivery.url,
                attempts = delivery.attempts.len(),
                "webhook delivery exhausted"
            );
        } else {
            crate::metrics::WEBHOOK_DELIVERIES
                .with_label_values(&["retrying"])
                .inc();
            // Exponential backoff: 30s, 60s, 120s, 240s.
            let exponent = delivery.attempts.len().saturating_sub(1) as u32;
            let delay = BASE_BACKOFF_SECS * (1_i64 << exponent.min(8));
            delivery.next_retry_at = Some(Utc::now() + chrono::Duration::seconds(delay));
        }
    }
}
