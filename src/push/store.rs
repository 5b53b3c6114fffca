//! Subscription store: persistence for push subscriptions.
//!
//! The [`SubscriptionStore`] trait abstracts over storage backends. Two
//! implementations ship with the crate:
//!
//! - [`InMemorySubscriptionStore`]: a `DashMap` keyed by endpoint.
//! - [`FileSubscriptionStore`]: the same map, written to a JSON file after
//!   every mutation (temp file + rename).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::subscription::{PushSubscription, SubscriptionFilter};
use crate::{Error, Result};

/// Trait abstracting the subscription storage backend.
///
/// Implementations must be `Send + Sync` because the store is shared across
/// request handlers and dispatch runs.
#[async_trait::async_trait]
pub trait SubscriptionStore: Send + Sync + 'static {
    /// Load the subscriptions selected by `filter`.
    async fn find_many(&self, filter: &SubscriptionFilter) -> Result<Vec<PushSubscription>>;

    /// Remove every subscription whose endpoint is listed.
    ///
    /// Returns the number of subscriptions actually removed.
    async fn delete_many(&self, endpoints: &[String]) -> Result<usize>;

    /// Insert or update a subscription keyed by its endpoint.
    ///
    /// An update keeps the original `created_at`.
    async fn upsert(&self, subscription: PushSubscription) -> Result<PushSubscription>;

    /// Remove one subscription. Returns `true` if it existed.
    async fn delete(&self, endpoint: &str) -> Result<bool>;
}

/// In-memory subscription store keyed by endpoint.
#[derive(Debug, Default)]
pub struct InMemorySubscriptionStore {
    by_endpoint: DashMap<String, PushSubscription>,
}

impl InMemorySubscriptionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_endpoint.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_endpoint.is_empty()
    }

    fn select(&self, filter: &SubscriptionFilter) -> Vec<PushSubscription> {
        let mut selected: Vec<PushSubscription> = self
            .by_endpoint
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        selected.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        selected
    }

    fn remove_all(&self, endpoints: &[String]) -> usize {
        let unique: HashSet<&String> = endpoints.iter().collect();
        unique
            .into_iter()
            .filter(|endpoint| self.by_endpoint.remove(endpoint.as_str()).is_some())
            .count()
    }

    /// The record an upsert of `subscription` would store
    fn prepare(&self, mut subscription: PushSubscription) -> PushSubscription {
        if let Some(existing) = self.by_endpoint.get(&subscription.endpoint) {
            subscription.created_at = existing.created_at;
        }
        subscription.updated_at = Utc::now();
        subscription
    }

    fn put(&self, subscription: PushSubscription) -> PushSubscription {
        let subscription = self.prepare(subscription);
        self.by_endpoint
            .insert(subscription.endpoint.clone(), subscription.clone());
        subscription
    }
}

#[async_trait::async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn find_many(&self, filter: &SubscriptionFilter) -> Result<Vec<PushSubscription>> {
        Ok(self.select(filter))
    }

    async fn delete_many(&self, endpoints: &[String]) -> Result<usize> {
        Ok(self.remove_all(endpoints))
    }

    async fn upsert(&self, subscription: PushSubscription) -> Result<PushSubscription> {
        Ok(self.put(subscription))
    }

    async fn delete(&self, endpoint: &str) -> Result<bool> {
        Ok(self.by_endpoint.remove(endpoint).is_some())
    }
}

/// Subscription store persisted to a JSON file.
///
/// The whole set is rewritten on every mutation; writes are serialized by an
/// async mutex so concurrent mutations never interleave file contents. The
/// in-memory view changes only after the new contents reach disk, so a
/// failed write leaves memory and file in agreement.
pub struct FileSubscriptionStore {
    path: PathBuf,
    memory: InMemorySubscriptionStore,
    write_lock: Mutex<()>,
}

impl FileSubscriptionStore {
    /// Open (or create on first write) the store at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let memory = InMemorySubscriptionStore::new();

        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let subscriptions: Vec<PushSubscription> = serde_json::from_slice(&bytes)
                    .map_err(|e| {
                        Error::Store(format!("Corrupt subscription file {}: {e}", path.display()))
                    })?;
                for subscription in subscriptions {
                    memory
                        .by_endpoint
                        .insert(subscription.endpoint.clone(), subscription);
                }
                info!(
                    path = %path.display(),
                    count = memory.len(),
                    "Loaded push subscriptions"
                );
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Subscription file not found, starting empty");
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Self {
            path,
            memory,
            write_lock: Mutex::new(()),
        })
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `snapshot` as the full file contents. Callers hold `write_lock`.
    async fn persist(&self, snapshot: &[PushSubscription]) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(path = %self.path.display(), count = snapshot.len(), "Persisted subscriptions");
        Ok(())
    }
}

#[async_trait::async_trait]
impl SubscriptionStore for FileSubscriptionStore {
    async fn find_many(&self, filter: &SubscriptionFilter) -> Result<Vec<PushSubscription>> {
        Ok(self.memory.select(filter))
    }

    async fn delete_many(&self, endpoints: &[String]) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let doomed: HashSet<&str> = endpoints.iter().map(String::as_str).collect();
        let mut snapshot = self.memory.select(&SubscriptionFilter::All);
        let before = snapshot.len();
        snapshot.retain(|sub| !doomed.contains(sub.endpoint.as_str()));
        if snapshot.len() == before {
            return Ok(0);
        }

        self.persist(&snapshot).await?;
        Ok(self.memory.remove_all(endpoints))
    }

    async fn upsert(&self, subscription: PushSubscription) -> Result<PushSubscription> {
        let _guard = self.write_lock.lock().await;
        let stored = self.memory.prepare(subscription);
        let mut snapshot = self.memory.select(&SubscriptionFilter::All);
        snapshot.retain(|sub| sub.endpoint != stored.endpoint);
        snapshot.push(stored.clone());
        snapshot.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        self.persist(&snapshot).await?;
        self.memory
            .by_endpoint
            .insert(stored.endpoint.clone(), stored.clone());
        Ok(stored)
    }

    async fn delete(&self, endpoint: &str) -> Result<bool> {
        let removed = self.delete_many(&[endpoint.to_string()]).await?;
        Ok(removed > 0)
    }
}
