//! Push dispatcher
//!
//! Fans a payload out to stored subscriptions with bounded concurrency and
//! prunes subscriptions the push service reports as gone.
//!
//! # Semantics
//!
//! - Every send settles before cleanup runs; one subscription's failure never
//!   affects another's attempt.
//! - `Gone` endpoints are deleted in one batch after all sends. Cleanup is
//!   best-effort: a failing delete is logged and the report is still returned.
//! - `Transient` failures are logged and the subscription is kept.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::payload::PushPayload;
use super::sender::{DeliveryOutcome, PushSender};
use super::store::SubscriptionStore;
use super::subscription::SubscriptionFilter;
use crate::Result;

/// Default bound on concurrent sends
pub const DEFAULT_MAX_CONCURRENCY: usize = 32;

/// Counts reported by one dispatch run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    /// Subscriptions the push service accepted the message for
    pub sent_count: usize,
    /// Subscriptions classified gone and scheduled for removal
    pub expired_count: usize,
}

/// Sends notifications to stored subscriptions
pub struct Dispatcher {
    store: Arc<dyn SubscriptionStore>,
    sender: Arc<dyn PushSender>,
    max_concurrency: usize,
}

impl Dispatcher {
    /// Create a dispatcher; `max_concurrency` of 0 is treated as 1
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        sender: Arc<dyn PushSender>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            store,
            sender,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// The subscription store this dispatcher prunes
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SubscriptionStore> {
        &self.store
    }

    /// Deliver `payload` to every subscription, or to one user's subscriptions
    ///
    /// # Errors
    ///
    /// Only a failure to load subscriptions is returned; delivery and cleanup
    /// problems are reflected in the report or logged.
    pub async fn dispatch(
        &self,
        payload: &PushPayload,
        target_user_id: Option<&str>,
    ) -> Result<DispatchReport> {
        let filter = SubscriptionFilter::for_target(target_user_id);
        let subscriptions = self.store.find_many(&filter).await?;

        if subscriptions.is_empty() {
            debug!(target_user = ?target_user_id, "No subscriptions to notify");
            return Ok(DispatchReport::default());
        }

        let body = payload.to_bytes()?;
        let candidates = subscriptions.len();

        let outcomes: Vec<(String, DeliveryOutcome)> = stream::iter(subscriptions)
            .map(|subscription| {
                let sender = Arc::clone(&self.sender);
                let body = &body;
                async move {
                    let outcome = sender.send(&subscription, body).await;
                    (subscription.endpoint, outcome)
                }
            })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let mut report = DispatchReport::default();
        let mut gone = Vec::new();
        let mut transient = 0usize;
        for (endpoint, outcome) in outcomes {
            match outcome {
                DeliveryOutcome::Delivered => report.sent_count += 1,
                DeliveryOutcome::Gone => {
                    debug!(endpoint = %endpoint, "Subscription gone, scheduling removal");
                    gone.push(endpoint);
                }
                DeliveryOutcome::Transient(reason) => {
                    transient += 1;
                    warn!(endpoint = %endpoint, reason = %reason, "Push delivery failed");
                }
            }
        }
        report.expired_count = gone.len();

        if !gone.is_empty() {
            if let Err(e) = self.store.delete_many(&gone).await {
                warn!(error = %e, count = gone.len(), "Failed to prune expired subscriptions");
            }
        }

        telemetry_metrics::counter!("pricewatch_push_sent_total").increment(report.sent_count as u64);
        telemetry_metrics::counter!("pricewatch_push_expired_total").increment(report.expired_count as u64);
        telemetry_metrics::counter!("pricewatch_push_transient_total").increment(transient as u64);

        info!(
            tag = %payload.tag,
            candidates,
            sent = report.sent_count,
            expired = report.expired_count,
            failed = transient,
            "Push dispatch complete"
        );
        Ok(report)
    }
}
