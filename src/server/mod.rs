//! HTTP server
//!
//! Wires the cache, upstream client, subscription store and push dispatcher
//! into an axum application and runs it until Ctrl-C or SIGTERM.

pub mod auth;
pub mod router;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub use auth::DispatchAuth;
pub use router::{AppState, create_router};

use crate::cache::{ResponseCache, SystemClock};
use crate::config::Config;
use crate::push::{
    Dispatcher, FileSubscriptionStore, InMemorySubscriptionStore, SubscriptionStore, VapidKeys, WebPushSender,
};
use crate::upstream::{CachedProductApi, HttpProductApi};
use crate::{Error, Result};

/// Price tracking server
pub struct Server {
    config: Config,
    cache: Arc<ResponseCache>,
    state: Arc<AppState>,
}

impl Server {
    /// Build every component from configuration
    ///
    /// Missing upstream credentials or VAPID keys disable the matching
    /// routes instead of failing startup.
    pub async fn new(config: Config) -> Result<Self> {
        let cache = Arc::new(ResponseCache::with_clock(
            Arc::new(SystemClock),
            config.cache.max_entries,
        ));
        let store = open_store(&config).await?;
        let mut state = AppState::new(Arc::clone(&cache), Arc::clone(&store));

        if config.upstream.access_key.is_some() && config.upstream.secret_key.is_some() {
            let client = HttpProductApi::new(&config.upstream)?;
            let cached = CachedProductApi::new(Arc::new(client), Arc::clone(&cache), config.cache.ttl.clone());
            state = state.with_products(Arc::new(cached));
        } else {
            warn!("Upstream credentials not configured - product routes disabled");
        }

        if let Some(keys) = VapidKeys::from_config(&config.push)? {
            let public_key = keys.public_key_base64();
            let sender = WebPushSender::new(keys, &config.push)?;
            let dispatcher = Dispatcher::new(store, Arc::new(sender), config.push.max_concurrency);
            state = state.with_dispatcher(Arc::new(dispatcher), Some(public_key));
        } else {
            warn!("VAPID keys not configured - push dispatch disabled");
        }

        let secret = config.auth.resolve_dispatch_secret();
        if config.auth.dispatch_secret.as_deref() == Some("auto") {
            if let Some(generated) = &secret {
                info!("Generated dispatch secret (valid until restart): {generated}");
            }
        }
        state = state.with_dispatch_auth(DispatchAuth::new(secret));

        #[cfg(feature = "metrics")]
        if let Some(handle) = crate::metrics::install_recorder() {
            state = state.with_metrics(handle);
        }

        Ok(Self {
            config,
            cache,
            state: Arc::new(state),
        })
    }

    /// Run until a shutdown signal arrives
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let (shutdown_tx, _) = broadcast::channel(1);
        let app = create_router(Arc::clone(&self.state), &self.config.server);
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("PRICEWATCH v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(
            search_ttl = ?self.config.cache.ttl.search,
            best_products_ttl = ?self.config.cache.ttl.best_products,
            max_entries = self.config.cache.max_entries,
            "Response cache ready"
        );
        if self.state_has_dispatch_secret() {
            info!("DISPATCH enabled: POST /api/push/send, POST /api/push/price-drop");
        } else {
            warn!("DISPATCH disabled - set auth.dispatch_secret to enable");
        }
        info!("============================================================");

        spawn_cache_sweeper(
            Arc::clone(&self.cache),
            self.config.cache.sweep_interval,
            shutdown_tx.subscribe(),
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Server stopped");
        Ok(())
    }

    fn state_has_dispatch_secret(&self) -> bool {
        self.config
            .auth
            .dispatch_secret
            .as_deref()
            .is_some_and(|s| !s.is_empty())
    }
}

/// Open the configured subscription store
pub async fn open_store(config: &Config) -> Result<Arc<dyn SubscriptionStore>> {
    match &config.store.path {
        Some(path) => {
            let store = FileSubscriptionStore::open(path).await?;
            info!(path = %path.display(), "Using file subscription store");
            Ok(Arc::new(store))
        }
        None => {
            warn!("store.path not set - subscriptions are kept in memory only");
            Ok(Arc::new(InMemorySubscriptionStore::new()))
        }
    }
}

/// Periodically drop expired cache entries until shutdown
fn spawn_cache_sweeper(
    cache: Arc<ResponseCache>,
    interval: std::time::Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    if interval.is_zero() {
        return;
    }
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = cache.evict_expired();
                    if removed > 0 {
                        debug!(removed, remaining = cache.len(), "Swept expired cache entries");
                    }
                }
                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }
    });
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
