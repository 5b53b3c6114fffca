//! Pricewatch Library
//!
//! Backend for a price-tracking app built on an affiliate marketplace API.
//!
//! # Features
//!
//! - **Response Cache**: TTL memoization shielding the rate-limited upstream
//!   product API, with an injectable clock and optional size bound
//! - **Signed Upstream Client**: HMAC-signed, throttled product search and
//!   best-seller lookups
//! - **Web Push**: RFC 8291 payload encryption and RFC 8292 VAPID
//!   identification, no external push library
//! - **Push Dispatcher**: bounded-concurrency fan-out that prunes gone
//!   subscriptions in one batch
//! - **Production Ready**: structured logging, Prometheus metrics, graceful
//!   shutdown

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod push;
pub mod server;
pub mod upstream;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string()))?,
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string()))?,
    }

    Ok(())
}
