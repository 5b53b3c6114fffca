//! Push dispatch outcomes, filtering and pruning

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use pricewatch::push::{
    DeliveryOutcome, DispatchReport, Dispatcher, InMemorySubscriptionStore, PushPayload, PushSender,
    PushSubscription, SubscriptionFilter, SubscriptionKeys, SubscriptionStore,
};
use pricewatch::{Error, Result};

fn keys() -> SubscriptionKeys {
    let mut point = vec![0x04];
    point.extend_from_slice(&[1u8; 64]);
    SubscriptionKeys {
        p256dh: URL_SAFE_NO_PAD.encode(point),
        auth: URL_SAFE_NO_PAD.encode([2u8; 16]),
    }
}

fn subscription(endpoint: &str, user: Option<&str>) -> PushSubscription {
    PushSubscription::new(endpoint, keys(), user.map(str::to_string))
}

fn payload() -> PushPayload {
    PushPayload::price_drop("Running shoes", 50_000, 39_000, "https://shop.example/p/1")
}

/// Sender answering from a per-endpoint script; unscripted endpoints succeed
#[derive(Default)]
struct ScriptedSender {
    outcomes: HashMap<String, DeliveryOutcome>,
    attempts: Mutex<Vec<String>>,
}

impl ScriptedSender {
    fn with(mut self, endpoint: &str, outcome: DeliveryOutcome) -> Self {
        self.outcomes.insert(endpoint.to_string(), outcome);
        self
    }

    fn attempted(&self) -> Vec<String> {
        let mut attempts = self.attempts.lock().clone();
        attempts.sort();
        attempts
    }
}

#[async_trait::async_trait]
impl PushSender for ScriptedSender {
    async fn send(&self, subscription: &PushSubscription, payload: &[u8]) -> DeliveryOutcome {
        assert!(!payload.is_empty());
        self.attempts.lock().push(subscription.endpoint.clone());
        self.outcomes
            .get(&subscription.endpoint)
            .cloned()
            .unwrap_or(DeliveryOutcome::Delivered)
    }
}

/// Store wrapper recording batch deletes, optionally failing them
struct RecordingStore {
    inner: InMemorySubscriptionStore,
    delete_batches: Mutex<Vec<Vec<String>>>,
    find_calls: AtomicUsize,
    fail_deletes: bool,
}

impl RecordingStore {
    async fn seeded(subscriptions: Vec<PushSubscription>, fail_deletes: bool) -> Arc<Self> {
        let inner = InMemorySubscriptionStore::new();
        for sub in subscriptions {
            inner.upsert(sub).await.unwrap();
        }
        Arc::new(Self {
            inner,
            delete_batches: Mutex::new(Vec::new()),
            find_calls: AtomicUsize::new(0),
            fail_deletes,
        })
    }
}

#[async_trait::async_trait]
impl SubscriptionStore for RecordingStore {
    async fn find_many(&self, filter: &SubscriptionFilter) -> Result<Vec<PushSubscription>> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.find_many(filter).await
    }

    async fn delete_many(&self, endpoints: &[String]) -> Result<usize> {
        self.delete_batches.lock().push(endpoints.to_vec());
        if self.fail_deletes {
            return Err(Error::Store("database unavailable".to_string()));
        }
        self.inner.delete_many(endpoints).await
    }

    async fn upsert(&self, subscription: PushSubscription) -> Result<PushSubscription> {
        self.inner.upsert(subscription).await
    }

    async fn delete(&self, endpoint: &str) -> Result<bool> {
        self.inner.delete(endpoint).await
    }
}

#[tokio::test]
async fn test_no_subscriptions_skips_sending() {
    let store = RecordingStore::seeded(Vec::new(), false).await;
    let sender = Arc::new(ScriptedSender::default());
    let dispatcher = Dispatcher::new(store.clone(), sender.clone(), 8);

    let report = dispatcher.dispatch(&payload(), None).await.unwrap();

    assert_eq!(report, DispatchReport { sent_count: 0, expired_count: 0 });
    assert!(sender.attempted().is_empty());
    assert!(store.delete_batches.lock().is_empty());
}

#[tokio::test]
async fn test_mixed_outcomes_prune_only_gone() {
    let store = RecordingStore::seeded(
        vec![
            subscription("https://push.example/a", None),
            subscription("https://push.example/b", None),
            subscription("https://push.example/c", None),
        ],
        false,
    )
    .await;
    let sender = Arc::new(
        ScriptedSender::default()
            .with("https://push.example/b", DeliveryOutcome::Gone)
            .with(
                "https://push.example/c",
                DeliveryOutcome::Transient("push service returned 500".to_string()),
            ),
    );
    let dispatcher = Dispatcher::new(store.clone(), sender.clone(), 8);

    let report = dispatcher.dispatch(&payload(), None).await.unwrap();

    assert_eq!(report, DispatchReport { sent_count: 1, expired_count: 1 });
    assert_eq!(sender.attempted().len(), 3);
    assert_eq!(
        *store.delete_batches.lock(),
        vec![vec!["https://push.example/b".to_string()]]
    );

    let mut remaining: Vec<String> = store
        .find_many(&SubscriptionFilter::All)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.endpoint)
        .collect();
    remaining.sort();
    assert_eq!(remaining, vec!["https://push.example/a", "https://push.example/c"]);
}

#[tokio::test]
async fn test_target_user_filter() {
    let store = RecordingStore::seeded(
        vec![
            subscription("https://push.example/alice-phone", Some("alice")),
            subscription("https://push.example/alice-laptop", Some("alice")),
            subscription("https://push.example/bob", Some("bob")),
            subscription("https://push.example/anon", None),
        ],
        false,
    )
    .await;
    let sender = Arc::new(
        ScriptedSender::default().with("https://push.example/bob", DeliveryOutcome::Gone),
    );
    let dispatcher = Dispatcher::new(store.clone(), sender.clone(), 8);

    let report = dispatcher.dispatch(&payload(), Some("alice")).await.unwrap();

    assert_eq!(report, DispatchReport { sent_count: 2, expired_count: 0 });
    assert_eq!(
        sender.attempted(),
        vec![
            "https://push.example/alice-laptop".to_string(),
            "https://push.example/alice-phone".to_string(),
        ]
    );
    assert_eq!(store.find_many(&SubscriptionFilter::All).await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_gone_subscription_pruned_once() {
    let store = RecordingStore::seeded(
        vec![
            subscription("https://push.example/ok", None),
            subscription("https://push.example/gone", None),
        ],
        false,
    )
    .await;
    let sender = Arc::new(
        ScriptedSender::default().with("https://push.example/gone", DeliveryOutcome::Gone),
    );
    let dispatcher = Dispatcher::new(store.clone(), sender.clone(), 8);

    let first = dispatcher.dispatch(&payload(), None).await.unwrap();
    assert_eq!(first, DispatchReport { sent_count: 1, expired_count: 1 });

    let second = dispatcher.dispatch(&payload(), None).await.unwrap();
    assert_eq!(second, DispatchReport { sent_count: 1, expired_count: 0 });

    let gone_attempts = sender
        .attempted()
        .into_iter()
        .filter(|e| e.ends_with("/gone"))
        .count();
    assert_eq!(gone_attempts, 1);
    assert_eq!(store.delete_batches.lock().len(), 1);
}

#[tokio::test]
async fn test_cleanup_failure_still_reports() {
    let store = RecordingStore::seeded(
        vec![
            subscription("https://push.example/ok", None),
            subscription("https://push.example/gone", None),
        ],
        true,
    )
    .await;
    let sender = Arc::new(
        ScriptedSender::default().with("https://push.example/gone", DeliveryOutcome::Gone),
    );
    let dispatcher = Dispatcher::new(store.clone(), sender, 8);

    let report = dispatcher.dispatch(&payload(), None).await.unwrap();

    assert_eq!(report, DispatchReport { sent_count: 1, expired_count: 1 });
    assert_eq!(store.delete_batches.lock().len(), 1);
    // Left in place; the next run finds it gone again
    assert_eq!(store.find_many(&SubscriptionFilter::All).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_all_transient_keeps_everything() {
    let endpoints: Vec<String> = (0..10).map(|i| format!("https://push.example/{i}")).collect();
    let store = RecordingStore::seeded(
        endpoints.iter().map(|e| subscription(e, None)).collect(),
        false,
    )
    .await;
    let mut sender = ScriptedSender::default();
    for endpoint in &endpoints {
        sender = sender.with(endpoint, DeliveryOutcome::Transient("timeout".to_string()));
    }
    let dispatcher = Dispatcher::new(store.clone(), Arc::new(sender), 3);

    let report = dispatcher.dispatch(&payload(), None).await.unwrap();

    assert_eq!(report, DispatchReport::default());
    assert!(store.delete_batches.lock().is_empty());
    assert_eq!(store.find_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_report_serializes_camel_case() {
    let report = DispatchReport { sent_count: 3, expired_count: 1 };
    assert_eq!(
        serde_json::to_value(report).unwrap(),
        serde_json::json!({"sentCount": 3, "expiredCount": 1})
    );
}
