//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State, rejection::JsonRejection, rejection::QueryRejection},
    http::{HeaderValue, Method, StatusCode, header},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{debug, info};

use super::auth::{DispatchAuth, dispatch_auth_middleware};
use crate::cache::{CacheStatsSnapshot, ResponseCache};
use crate::config::ServerConfig;
use crate::push::{DispatchReport, Dispatcher, PushPayload, PushSubscription, SubscriptionKeys, SubscriptionStore};
use crate::upstream::{Product, ProductApi, SearchResult};
use crate::{Error, Result};

/// Page size used when a request omits `limit`
pub const DEFAULT_LIMIT: u32 = 20;

/// Event type for ad-hoc notifications sent without `eventType`
const DEFAULT_EVENT: &str = "notification";

/// Shared application state
pub struct AppState {
    /// Cached product API, absent when upstream credentials are not configured
    products: Option<Arc<dyn ProductApi>>,
    /// Response cache behind `products`
    cache: Arc<ResponseCache>,
    /// Subscription store
    store: Arc<dyn SubscriptionStore>,
    /// Push dispatcher, absent when VAPID keys are not configured
    dispatcher: Option<Arc<Dispatcher>>,
    /// Public key clients subscribe with
    vapid_public_key: Option<String>,
    /// Dispatch trigger authentication
    dispatch_auth: Arc<DispatchAuth>,
    /// Prometheus exposition
    #[cfg(feature = "metrics")]
    metrics: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl AppState {
    /// State with no upstream, no dispatcher and dispatch disabled
    pub fn new(cache: Arc<ResponseCache>, store: Arc<dyn SubscriptionStore>) -> Self {
        Self {
            products: None,
            cache,
            store,
            dispatcher: None,
            vapid_public_key: None,
            dispatch_auth: Arc::new(DispatchAuth::default()),
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Serve product routes from `products`
    #[must_use]
    pub fn with_products(mut self, products: Arc<dyn ProductApi>) -> Self {
        self.products = Some(products);
        self
    }

    /// Enable push dispatch
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: Arc<Dispatcher>, vapid_public_key: Option<String>) -> Self {
        self.dispatcher = Some(dispatcher);
        self.vapid_public_key = vapid_public_key;
        self
    }

    /// Gate dispatch endpoints
    #[must_use]
    pub fn with_dispatch_auth(mut self, auth: DispatchAuth) -> Self {
        self.dispatch_auth = Arc::new(auth);
        self
    }

    /// Expose `handle` at `GET /metrics`
    #[cfg(feature = "metrics")]
    #[must_use]
    pub fn with_metrics(mut self, handle: metrics_exporter_prometheus::PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    fn products(&self) -> Result<&Arc<dyn ProductApi>> {
        self.products
            .as_ref()
            .ok_or_else(|| Error::Unavailable("Upstream product API not configured".to_string()))
    }

    fn dispatcher(&self) -> Result<&Arc<Dispatcher>> {
        self.dispatcher
            .as_ref()
            .ok_or_else(|| Error::Unavailable("VAPID keys not configured; push disabled".to_string()))
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>, config: &ServerConfig) -> Router {
    let dispatch_auth = Arc::clone(&state.dispatch_auth);

    // Authenticated before any extractor or handler runs
    let dispatch_routes = Router::new()
        .route("/api/push/send", post(send_handler))
        .route("/api/push/price-drop", post(price_drop_handler))
        .route_layer(middleware::from_fn_with_state(dispatch_auth, dispatch_auth_middleware));

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/api/search", get(search_handler))
        .route("/api/products/best", get(best_products_handler))
        .route("/api/cache/stats", get(cache_stats_handler))
        .route(
            "/api/push/subscriptions",
            post(subscribe_handler).delete(unsubscribe_handler),
        )
        .route("/api/push/vapid-public-key", get(vapid_public_key_handler))
        .merge(dispatch_routes);

    #[cfg(feature = "metrics")]
    let router = router.route("/metrics", get(metrics_handler));

    let mut router = router
        .layer(RequestBodyLimitLayer::new(config.max_body_size))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .layer(CatchPanicLayer::new())
        .layer(CompressionLayer::new());

    if let Some(cors) = cors_layer(&config.cors_origins) {
        router = router.layer(cors);
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// CORS policy for the configured origins, `None` when CORS is disabled
fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    if origins.is_empty() {
        return None;
    }
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(origins.iter().filter_map(|o| HeaderValue::from_str(o).ok()))
    };
    Some(
        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
    )
}

/// Health check
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    keyword: Option<String>,
    limit: Option<u32>,
}

async fn search_handler(
    State(state): State<Arc<AppState>>,
    params: std::result::Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<SearchResult>> {
    let Query(params) = params.map_err(|e| Error::InvalidInput(e.body_text()))?;
    let keyword = params
        .keyword
        .ok_or_else(|| Error::InvalidInput("keyword is required".to_string()))?;
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);

    let result = state.products()?.search(&keyword, limit).await?;
    debug!(keyword = %keyword, count = result.products.len(), "Search served");
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BestProductsParams {
    category_id: Option<u32>,
    limit: Option<u32>,
}

async fn best_products_handler(
    State(state): State<Arc<AppState>>,
    params: std::result::Result<Query<BestProductsParams>, QueryRejection>,
) -> Result<Json<Vec<Product>>> {
    let Query(params) = params.map_err(|e| Error::InvalidInput(e.body_text()))?;
    let category_id = params
        .category_id
        .ok_or_else(|| Error::InvalidInput("categoryId is required".to_string()))?;
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);

    let products = state.products()?.best_products(category_id, limit).await?;
    Ok(Json(products))
}

async fn cache_stats_handler(State(state): State<Arc<AppState>>) -> Json<CacheStatsSnapshot> {
    Json(state.cache.stats())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeRequest {
    endpoint: String,
    keys: SubscriptionKeys,
    #[serde(default)]
    user_id: Option<String>,
}

async fn subscribe_handler(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Json<SubscribeRequest>, JsonRejection>,
) -> Result<impl IntoResponse> {
    let Json(request) = body.map_err(|e| Error::InvalidInput(e.body_text()))?;
    let user_id = request.user_id.filter(|id| !id.trim().is_empty());

    let subscription = PushSubscription::new(request.endpoint, request.keys, user_id);
    subscription.validate()?;

    let stored = state.store.upsert(subscription).await?;
    info!(user = ?stored.user_id, "Push subscription registered");
    Ok((StatusCode::CREATED, Json(stored)))
}

#[derive(Debug, Deserialize)]
struct UnsubscribeRequest {
    endpoint: String,
}

async fn unsubscribe_handler(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Json<UnsubscribeRequest>, JsonRejection>,
) -> Result<StatusCode> {
    let Json(request) = body.map_err(|e| Error::InvalidInput(e.body_text()))?;
    if state.store.delete(&request.endpoint).await? {
        info!("Push subscription removed");
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn vapid_public_key_handler(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let key = state
        .vapid_public_key
        .as_ref()
        .ok_or_else(|| Error::Unavailable("VAPID keys not configured; push disabled".to_string()))?;
    Ok(Json(json!({ "publicKey": key })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest {
    title: String,
    body: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    icon: Option<String>,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    badge: Option<String>,
    /// Event type; the notification tag becomes `<eventType>-<unix millis>`
    #[serde(default, alias = "tag")]
    event_type: Option<String>,
    #[serde(default)]
    target_user_id: Option<String>,
}

/// Broadcast an ad-hoc notification, optionally to one user's devices
async fn send_handler(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Json<SendRequest>, JsonRejection>,
) -> Result<Json<DispatchReport>> {
    let Json(request) = body.map_err(|e| Error::InvalidInput(e.body_text()))?;

    let mut payload = PushPayload::new(
        request.title,
        request.body,
        request.url.unwrap_or_else(|| "/".to_string()),
        request.event_type.as_deref().unwrap_or(DEFAULT_EVENT),
    );
    if let Some(icon) = request.icon {
        payload = payload.with_icon(icon);
    }
    if let Some(image) = request.image {
        payload = payload.with_image(image);
    }
    if let Some(badge) = request.badge {
        payload = payload.with_badge(badge);
    }
    payload.validate()?;

    let report = state
        .dispatcher()?
        .dispatch(&payload, request.target_user_id.as_deref())
        .await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceDropRequest {
    product_name: String,
    previous_price: u64,
    current_price: u64,
    url: String,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    target_user_id: Option<String>,
}

async fn price_drop_handler(
    State(state): State<Arc<AppState>>,
    body: std::result::Result<Json<PriceDropRequest>, JsonRejection>,
) -> Result<Json<DispatchReport>> {
    let Json(request) = body.map_err(|e| Error::InvalidInput(e.body_text()))?;
    if request.current_price >= request.previous_price {
        return Err(Error::InvalidInput(
            "currentPrice must be lower than previousPrice".to_string(),
        ));
    }

    let mut payload = PushPayload::price_drop(
        &request.product_name,
        request.previous_price,
        request.current_price,
        request.url,
    );
    if let Some(image) = request.image {
        payload = payload.with_image(image);
    }
    payload.validate()?;

    let report = state
        .dispatcher()?
        .dispatch(&payload, request.target_user_id.as_deref())
        .await?;
    Ok(Json(report))
}

#[cfg(feature = "metrics")]
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cors_disabled_without_origins() {
        assert!(cors_layer(&[]).is_none());
        assert!(cors_layer(&["*".to_string()]).is_some());
        assert!(cors_layer(&["https://shop.example".to_string()]).is_some());
    }

    #[test]
    fn test_state_reports_unconfigured_features() {
        let state = AppState::new(
            Arc::new(ResponseCache::new()),
            Arc::new(crate::push::InMemorySubscriptionStore::new()),
        );
        assert!(matches!(state.products(), Err(Error::Unavailable(_))));
        assert!(matches!(state.dispatcher(), Err(Error::Unavailable(_))));
    }
}
