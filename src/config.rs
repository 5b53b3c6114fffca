//! Configuration management

use std::{env, path::Path, path::PathBuf, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Placeholder shown instead of secret values
const REDACTED: &str = "<redacted>";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Dispatch trigger authentication
    pub auth: AuthConfig,
    /// Response cache configuration
    pub cache: CacheConfig,
    /// Upstream product API configuration
    pub upstream: UpstreamConfig,
    /// Web Push configuration
    pub push: PushConfig,
    /// Subscription store configuration
    pub store: StoreConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
    /// Allowed CORS origins (empty = CORS disabled, `*` = any)
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 39500,
            request_timeout: Duration::from_secs(30),
            max_body_size: 64 * 1024,
            cors_origins: Vec::new(),
        }
    }
}

/// Authentication for the push dispatch trigger
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Shared secret presented as `Authorization: Bearer <secret>`.
    /// Supports: literal value, `env:VAR_NAME`, or `auto` (generates random secret).
    /// Dispatch endpoints are disabled when unset.
    pub dispatch_secret: Option<String>,
}

impl AuthConfig {
    /// Resolve the dispatch secret (expand env vars, generate if `auto`)
    #[must_use]
    pub fn resolve_dispatch_secret(&self) -> Option<String> {
        self.dispatch_secret.as_deref().and_then(|secret| {
            if secret == "auto" {
                generate_token("pw_")
            } else {
                Some(resolve_env_ref(secret))
            }
        })
    }
}

/// Generate a random URL-safe token with the given prefix
fn generate_token(prefix: &str) -> Option<String> {
    let mut random_bytes = [0u8; 32];
    SystemRandom::new().fill(&mut random_bytes).ok()?;
    Some(format!(
        "{prefix}{}",
        base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            random_bytes
        )
    ))
}

/// Resolve `env:VAR_NAME` references, falling back to the literal value
#[must_use]
pub fn resolve_env_ref(value: &str) -> String {
    if let Some(var_name) = value.strip_prefix("env:") {
        env::var(var_name).unwrap_or_else(|_| value.to_string())
    } else {
        value.to_string()
    }
}

/// Cache configuration for upstream responses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Per-route TTL table
    pub ttl: CacheTtlConfig,
    /// Maximum number of entries before eviction (0 = unbounded)
    pub max_entries: usize,
    /// Interval of the background sweep of expired entries
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: CacheTtlConfig::default(),
            max_entries: 10_000,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// TTL per cached upstream operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheTtlConfig {
    /// Product search results
    #[serde(with = "humantime_serde")]
    pub search: Duration,
    /// Best products per category
    #[serde(with = "humantime_serde")]
    pub best_products: Duration,
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            search: Duration::from_secs(5 * 60),
            best_products: Duration::from_secs(10 * 60),
        }
    }
}

/// Upstream affiliate product API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// API base URL
    pub base_url: String,
    /// Access key (supports `env:VAR_NAME`)
    pub access_key: Option<String>,
    /// Secret key used for request signing (supports `env:VAR_NAME`)
    pub secret_key: Option<String>,
    /// Affiliate sub-id attached to generated links
    pub sub_id: Option<String>,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Outgoing request budget (0 = unlimited)
    pub requests_per_minute: u32,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api-gateway.coupang.com".to_string(),
            access_key: None,
            secret_key: None,
            sub_id: None,
            timeout: Duration::from_secs(10),
            requests_per_minute: 50,
        }
    }
}

/// Web Push configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// VAPID contact (`mailto:` or `https:` URI)
    pub vapid_subject: String,
    /// VAPID public key, base64url uncompressed P-256 point (supports `env:VAR_NAME`)
    pub vapid_public_key: Option<String>,
    /// VAPID private key, base64url 32-byte scalar (supports `env:VAR_NAME`)
    pub vapid_private_key: Option<String>,
    /// Maximum concurrent sends per dispatch
    pub max_concurrency: usize,
    /// How long the push service should retain undelivered messages
    #[serde(with = "humantime_serde")]
    pub message_ttl: Duration,
    /// Per-send network timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            vapid_subject: "mailto:admin@example.com".to_string(),
            vapid_public_key: None,
            vapid_private_key: None,
            max_concurrency: 32,
            message_ttl: Duration::from_secs(24 * 60 * 60),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Subscription store configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON file holding subscriptions (unset = in-memory only)
    pub path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (PRICEWATCH_ prefix)
        figment = figment.merge(Env::prefixed("PRICEWATCH_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.expand_env_vars()?;
        config.validate()?;

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = expand_home(path_str);
            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in config values
    fn expand_env_vars(&mut self) -> Result<()> {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .map_err(|e| Error::Internal(e.to_string()))?;

        self.upstream.base_url = Self::expand_string(&re, &self.upstream.base_url);
        self.push.vapid_subject = Self::expand_string(&re, &self.push.vapid_subject);
        if let Some(path) = &self.store.path {
            let expanded = Self::expand_string(&re, &path.to_string_lossy());
            self.store.path = Some(PathBuf::from(expand_home(&expanded)));
        }
        Ok(())
    }

    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }

    /// Reject settings the service cannot run with
    fn validate(&self) -> Result<()> {
        if self.push.max_concurrency == 0 {
            return Err(Error::Config(
                "push.max_concurrency must be at least 1".to_string(),
            ));
        }
        if !self.push.vapid_subject.starts_with("mailto:")
            && !self.push.vapid_subject.starts_with("https:")
        {
            return Err(Error::Config(format!(
                "push.vapid_subject must be a mailto: or https: URI, got '{}'",
                self.push.vapid_subject
            )));
        }
        url::Url::parse(&self.upstream.base_url)
            .map_err(|e| Error::Config(format!("Invalid upstream.base_url: {e}")))?;
        Ok(())
    }

    /// Copy of this config with every secret replaced by a placeholder
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        let redact = |value: &mut Option<String>| {
            if value.is_some() {
                *value = Some(REDACTED.to_string());
            }
        };
        redact(&mut copy.auth.dispatch_secret);
        redact(&mut copy.upstream.secret_key);
        redact(&mut copy.push.vapid_private_key);
        copy
    }
}

/// Expand a leading `~` to the home directory
fn expand_home(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.display().to_string(), 1);
        }
    }
    path.to_string()
}
