//! HTTP client for the affiliate open API
//!
//! # Security
//!
//! Every request carries an HMAC-SHA256 signature over
//! `signed-date + method + path + query`. The secret key never leaves this
//! module and is never logged.

use std::num::NonZeroU32;

use chrono::{DateTime, Utc};
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, header};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, warn};

use super::{Product, ProductApi, SearchResult};
use crate::config::{UpstreamConfig, resolve_env_ref};
use crate::{Error, Result};

const SEARCH_PATH: &str = "/v2/providers/affiliate_open_api/apis/openapi/v1/products/search";
const BEST_CATEGORY_PATH: &str = "/v2/providers/affiliate_open_api/apis/openapi/v1/products/bestcategories";

/// Type alias for the outgoing request limiter
type UpstreamRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Signed affiliate API client
pub struct HttpProductApi {
    client: Client,
    base_url: String,
    access_key: String,
    secret_key: String,
    sub_id: Option<String>,
    limiter: Option<UpstreamRateLimiter>,
}

/// Envelope shared by all API responses
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    r_code: String,
    #[serde(default)]
    r_message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchData {
    #[serde(default)]
    landing_url: String,
    #[serde(default)]
    product_data: Vec<RawProduct>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProduct {
    product_id: u64,
    product_name: String,
    product_price: u64,
    #[serde(default)]
    product_image: String,
    #[serde(default)]
    product_url: String,
    #[serde(default)]
    category_name: Option<String>,
    #[serde(default)]
    is_rocket: bool,
    #[serde(default)]
    is_free_shipping: bool,
}

impl From<RawProduct> for Product {
    fn from(raw: RawProduct) -> Self {
        Self {
            id: raw.product_id,
            name: raw.product_name,
            price: raw.product_price,
            image_url: raw.product_image,
            product_url: raw.product_url,
            category: raw.category_name,
            is_rocket: raw.is_rocket,
            is_free_shipping: raw.is_free_shipping,
        }
    }
}

impl HttpProductApi {
    /// Create a client from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if credentials are missing or the HTTP client cannot
    /// be built.
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let access_key = config
            .access_key
            .as_deref()
            .map(resolve_env_ref)
            .ok_or_else(|| Error::Config("upstream.access_key is not set".to_string()))?;
        let secret_key = config
            .secret_key
            .as_deref()
            .map(resolve_env_ref)
            .ok_or_else(|| Error::Config("upstream.secret_key is not set".to_string()))?;

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {e}")))?;

        let limiter = NonZeroU32::new(config.requests_per_minute)
            .map(|quota| RateLimiter::direct(Quota::per_minute(quota)));

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_key,
            secret_key,
            sub_id: config.sub_id.clone(),
            limiter,
        })
    }

    /// Encoded query string, `subId` last when set
    ///
    /// The serializer is not `Send`, so it must not be held across an await.
    fn query_string(&self, params: &[(&str, String)]) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        for (name, value) in params {
            query.append_pair(name, value);
        }
        if let Some(sub_id) = &self.sub_id {
            query.append_pair("subId", sub_id);
        }
        query.finish()
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> Result<T> {
        let query = self.query_string(params);

        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let authorization = self.authorization(&Method::GET, path, &query, Utc::now())?;
        let url = format!("{}{path}?{query}", self.base_url);
        debug!(path = %path, "Calling upstream product API");

        let response = self
            .client
            .get(&url)
            .header(header::AUTHORIZATION, authorization)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, path = %path, "Upstream request failed");
            return Err(Error::Upstream(format!(
                "HTTP {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("Malformed response: {e}")))?;
        if envelope.r_code != "0" {
            return Err(Error::Upstream(format!(
                "API error {}: {}",
                envelope.r_code, envelope.r_message
            )));
        }
        envelope
            .data
            .ok_or_else(|| Error::Upstream("Response has no data".to_string()))
    }

    /// `Authorization` header value for a request
    fn authorization(&self, method: &Method, path: &str, query: &str, now: DateTime<Utc>) -> Result<String> {
        let signed_date = now.format("%y%m%dT%H%M%SZ").to_string();
        let message = format!("{signed_date}{method}{path}{query}");

        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| Error::Config(format!("Invalid secret key: {e}")))?;
        mac.update(message.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(format!(
            "CEA algorithm=HmacSHA256, access-key={}, signed-date={signed_date}, signature={signature}",
            self.access_key
        ))
    }
}

#[async_trait::async_trait]
impl ProductApi for HttpProductApi {
    async fn search(&self, keyword: &str, limit: u32) -> Result<SearchResult> {
        let data: SearchData = self
            .get(
                SEARCH_PATH,
                &[("keyword", keyword.to_string()), ("limit", limit.to_string())],
            )
            .await?;
        Ok(SearchResult {
            landing_url: data.landing_url,
            products: data.product_data.into_iter().map(Product::from).collect(),
        })
    }

    async fn best_products(&self, category_id: u32, limit: u32) -> Result<Vec<Product>> {
        let path = format!("{BEST_CATEGORY_PATH}/{category_id}");
        let data: Vec<RawProduct> = self.get(&path, &[("limit", limit.to_string())]).await?;
        Ok(data.into_iter().map(Product::from).collect())
    }
}
