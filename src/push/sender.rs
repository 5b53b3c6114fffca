//! Push-send primitive
//!
//! [`PushSender`] delivers one serialized payload to one subscription and
//! classifies the result. [`WebPushSender`] is the production implementation
//! speaking the Web Push protocol over HTTPS.

use std::fmt;
use std::time::Duration;

use reqwest::{Client, StatusCode, header};
use tracing::debug;

use super::crypto;
use super::subscription::PushSubscription;
use super::vapid::VapidKeys;
use crate::config::PushConfig;
use crate::{Error, Result};

/// Result of one delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Accepted by the push service
    Delivered,
    /// The push service reports the subscription no longer exists
    Gone,
    /// Any other failure; the subscription is kept
    Transient(String),
}

impl DeliveryOutcome {
    /// Classify an HTTP status returned by a push service
    ///
    /// 404 and 410 both count as gone.
    #[must_use]
    pub fn from_status(status: StatusCode) -> Self {
        if status.is_success() {
            Self::Delivered
        } else if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            Self::Gone
        } else {
            Self::Transient(format!("push service returned {status}"))
        }
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delivered => f.write_str("delivered"),
            Self::Gone => f.write_str("gone"),
            Self::Transient(reason) => write!(f, "transient: {reason}"),
        }
    }
}

/// Delivers a payload to a single subscription
#[async_trait::async_trait]
pub trait PushSender: Send + Sync + 'static {
    /// Attempt delivery. Never fails; problems are reported as outcomes.
    async fn send(&self, subscription: &PushSubscription, payload: &[u8]) -> DeliveryOutcome;
}

/// Message urgency hint (RFC 8030 §5.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    /// Deliver when the device is idle and charging
    VeryLow,
    /// Deliver when idle or on power
    Low,
    /// Default
    Normal,
    /// Deliver immediately
    High,
}

impl Urgency {
    fn as_str(self) -> &'static str {
        match self {
            Self::VeryLow => "very-low",
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

/// Web Push sender: encrypts with `aes128gcm` and signs with VAPID
pub struct WebPushSender {
    client: Client,
    keys: VapidKeys,
    subject: String,
    message_ttl: Duration,
    urgency: Urgency,
}

impl WebPushSender {
    /// Create a sender
    pub fn new(keys: VapidKeys, config: &PushConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            keys,
            subject: config.vapid_subject.clone(),
            message_ttl: config.message_ttl,
            urgency: Urgency::Normal,
        })
    }

    /// Override the urgency hint
    #[must_use]
    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = urgency;
        self
    }

    /// Public key clients pass to `pushManager.subscribe`
    #[must_use]
    pub fn public_key(&self) -> String {
        self.keys.public_key_base64()
    }

    async fn try_send(&self, subscription: &PushSubscription, payload: &[u8]) -> Result<StatusCode> {
        let body = crypto::encrypt(&subscription.keys, payload)?;
        let authorization = self.keys.authorization(&subscription.endpoint, &self.subject)?;

        let response = self
            .client
            .post(&subscription.endpoint)
            .header(header::AUTHORIZATION, authorization)
            .header(header::CONTENT_ENCODING, "aes128gcm")
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header("TTL", self.message_ttl.as_secs().to_string())
            .header("Urgency", self.urgency.as_str())
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            debug!(status = %status, detail = %detail, "Push service rejected message");
        }
        Ok(status)
    }
}

#[async_trait::async_trait]
impl PushSender for WebPushSender {
    async fn send(&self, subscription: &PushSubscription, payload: &[u8]) -> DeliveryOutcome {
        match self.try_send(subscription, payload).await {
            Ok(status) => DeliveryOutcome::from_status(status),
            Err(e) => DeliveryOutcome::Transient(e.to_string()),
        }
    }
}
