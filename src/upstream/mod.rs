//! Upstream affiliate product API
//!
//! [`ProductApi`] is the contract handlers depend on. [`HttpProductApi`]
//! talks to the real service; [`CachedProductApi`] wraps any implementation
//! with the [`ResponseCache`] so repeated queries inside the TTL window never
//! reach the rate-limited upstream.

pub mod client;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::cache::{ResponseCache, create_key};
use crate::config::CacheTtlConfig;
use crate::{Error, Result};

pub use client::HttpProductApi;

/// Cache namespace for keyword searches
pub const SEARCH_NAMESPACE: &str = "search";
/// Cache namespace for best products per category
pub const BEST_PRODUCTS_NAMESPACE: &str = "best_products";

/// Largest page size accepted by the upstream API
pub const MAX_LIMIT: u32 = 100;

/// A product listed by the marketplace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    /// Marketplace product id
    pub id: u64,
    /// Display name
    pub name: String,
    /// Current price
    pub price: u64,
    /// Thumbnail URL
    pub image_url: String,
    /// Affiliate link
    pub product_url: String,
    /// Category name, when reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Fast-delivery eligible
    #[serde(default)]
    pub is_rocket: bool,
    /// Ships for free
    #[serde(default)]
    pub is_free_shipping: bool,
}

/// Keyword search response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    /// Marketplace search page for the keyword
    pub landing_url: String,
    /// Matching products
    pub products: Vec<Product>,
}

/// Product lookups against the upstream marketplace
#[async_trait::async_trait]
pub trait ProductApi: Send + Sync + 'static {
    /// Search products by keyword
    async fn search(&self, keyword: &str, limit: u32) -> Result<SearchResult>;

    /// Best-selling products of a category
    async fn best_products(&self, category_id: u32, limit: u32) -> Result<Vec<Product>>;
}

/// Check a page size is within what the upstream accepts
pub fn validate_limit(limit: u32) -> Result<u32> {
    if limit == 0 || limit > MAX_LIMIT {
        return Err(Error::InvalidInput(format!(
            "limit must be between 1 and {MAX_LIMIT}"
        )));
    }
    Ok(limit)
}

/// [`ProductApi`] decorator that memoizes responses in a [`ResponseCache`]
pub struct CachedProductApi {
    inner: Arc<dyn ProductApi>,
    cache: Arc<ResponseCache>,
    ttl: CacheTtlConfig,
}

impl CachedProductApi {
    /// Wrap `inner` with `cache`, using the per-operation TTL table
    pub fn new(inner: Arc<dyn ProductApi>, cache: Arc<ResponseCache>, ttl: CacheTtlConfig) -> Self {
        Self { inner, cache, ttl }
    }

    /// The underlying cache
    #[must_use]
    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }
}

#[async_trait::async_trait]
impl ProductApi for CachedProductApi {
    async fn search(&self, keyword: &str, limit: u32) -> Result<SearchResult> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(Error::InvalidInput("keyword must not be empty".to_string()));
        }
        let limit = validate_limit(limit)?;

        let key = create_key(SEARCH_NAMESPACE, &[&keyword, &limit]);
        let value = self
            .cache
            .get_or_fetch(&key, self.ttl.search, || async {
                debug!(key = %key, "Search cache miss");
                let result = self.inner.search(keyword, limit).await?;
                Ok::<Value, Error>(serde_json::to_value(result)?)
            })
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn best_products(&self, category_id: u32, limit: u32) -> Result<Vec<Product>> {
        let limit = validate_limit(limit)?;

        let key = create_key(BEST_PRODUCTS_NAMESPACE, &[&category_id, &limit]);
        let value = self
            .cache
            .get_or_fetch(&key, self.ttl.best_products, || async {
                debug!(key = %key, "Best products cache miss");
                let products = self.inner.best_products(category_id, limit).await?;
                Ok::<Value, Error>(serde_json::to_value(products)?)
            })
            .await?;
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::cache::ManualClock;

    #[derive(Default)]
    struct CountingApi {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl ProductApi for CountingApi {
        async fn search(&self, keyword: &str, limit: u32) -> Result<SearchResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::Upstream("rate limited".into()));
            }
            Ok(SearchResult {
                landing_url: format!("https://shop/search?q={keyword}"),
                products: (0..limit.min(2))
                    .map(|i| Product {
                        id: u64::from(i),
                        name: format!("{keyword} {i}"),
                        price: 1000,
                        image_url: String::new(),
                        product_url: String::new(),
                        category: None,
                        is_rocket: false,
                        is_free_shipping: true,
                    })
                    .collect(),
            })
        }

        async fn best_products(&self, _category_id: u32, _limit: u32) -> Result<Vec<Product>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    fn cached(api: Arc<CountingApi>) -> (Arc<ManualClock>, CachedProductApi) {
        let clock = Arc::new(ManualClock::new());
        let cache = Arc::new(ResponseCache::with_clock(clock.clone(), 0));
        (clock, CachedProductApi::new(api, cache, CacheTtlConfig::default()))
    }

    #[tokio::test]
    async fn test_search_served_from_cache_within_ttl() {
        let api = Arc::new(CountingApi::default());
        let (clock, cached) = cached(api.clone());

        let first = cached.search("shoes", 10).await.unwrap();
        clock.advance(Duration::from_secs(299));
        let second = cached.search("  shoes ", 10).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);
        assert!(cached.cache().get("search:shoes:10").is_some());

        clock.advance(Duration::from_secs(2));
        cached.search("shoes", 10).await.unwrap();
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_different_params_miss() {
        let api = Arc::new(CountingApi::default());
        let (_clock, cached) = cached(api.clone());

        cached.search("shoes", 10).await.unwrap();
        cached.search("shoes", 20).await.unwrap();
        cached.best_products(1001, 10).await.unwrap();
        cached.best_products(1002, 10).await.unwrap();
        assert_eq!(api.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_upstream_errors_not_cached() {
        let api = Arc::new(CountingApi {
            fail: true,
            ..CountingApi::default()
        });
        let (_clock, cached) = cached(api.clone());

        assert!(matches!(cached.search("shoes", 10).await, Err(Error::Upstream(_))));
        assert!(matches!(cached.search("shoes", 10).await, Err(Error::Upstream(_))));
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
        assert!(cached.cache().is_empty());
    }

    #[tokio::test]
    async fn test_input_validation() {
        let api = Arc::new(CountingApi::default());
        let (_clock, cached) = cached(api.clone());

        assert!(matches!(cached.search("   ", 10).await, Err(Error::InvalidInput(_))));
        assert!(matches!(cached.search("shoes", 0).await, Err(Error::InvalidInput(_))));
        assert!(matches!(cached.best_products(1, 101).await, Err(Error::InvalidInput(_))));
        assert_eq!(api.calls.load(Ordering::SeqCst), 0);
    }
}
