//! Push subscription records

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Length of an uncompressed P-256 public key
pub const P256_PUBLIC_KEY_LEN: usize = 65;
/// Length of the client authentication secret
pub const AUTH_SECRET_LEN: usize = 16;

/// Client keys used to encrypt payloads to a subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    /// Client ECDH public key (base64url)
    pub p256dh: String,
    /// Client authentication secret (base64url)
    pub auth: String,
}

impl SubscriptionKeys {
    /// Decode the client public key
    pub fn decode_p256dh(&self) -> Result<Vec<u8>> {
        let bytes = decode_base64url(&self.p256dh)
            .map_err(|e| Error::InvalidInput(format!("p256dh is not base64url: {e}")))?;
        if bytes.len() != P256_PUBLIC_KEY_LEN || bytes[0] != 0x04 {
            return Err(Error::InvalidInput(format!(
                "p256dh must be an uncompressed P-256 point ({P256_PUBLIC_KEY_LEN} bytes)"
            )));
        }
        Ok(bytes)
    }

    /// Decode the client authentication secret
    pub fn decode_auth(&self) -> Result<Vec<u8>> {
        let bytes = decode_base64url(&self.auth)
            .map_err(|e| Error::InvalidInput(format!("auth is not base64url: {e}")))?;
        if bytes.len() != AUTH_SECRET_LEN {
            return Err(Error::InvalidInput(format!(
                "auth must be {AUTH_SECRET_LEN} bytes"
            )));
        }
        Ok(bytes)
    }
}

/// Decode base64url with or without padding
pub(crate) fn decode_base64url(value: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(value.trim_end_matches('='))
}

/// A client-registered push channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscription {
    /// Push service URL; unique per subscription
    pub endpoint: String,
    /// Encryption keys
    pub keys: SubscriptionKeys,
    /// Owning user, absent for anonymous subscriptions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// First registration
    pub created_at: DateTime<Utc>,
    /// Last upsert
    pub updated_at: DateTime<Utc>,
}

impl PushSubscription {
    /// Build a new subscription stamped with the current time
    #[must_use]
    pub fn new(endpoint: impl Into<String>, keys: SubscriptionKeys, user_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            endpoint: endpoint.into(),
            keys,
            user_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check the endpoint is an https URL and both keys decode
    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.endpoint)
            .map_err(|e| Error::InvalidInput(format!("endpoint is not a URL: {e}")))?;
        if url.scheme() != "https" {
            return Err(Error::InvalidInput(
                "endpoint must use https".to_string(),
            ));
        }
        self.keys.decode_p256dh()?;
        self.keys.decode_auth()?;
        Ok(())
    }
}

/// Selection of subscriptions to load from a store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SubscriptionFilter {
    /// Every stored subscription
    #[default]
    All,
    /// Subscriptions owned by one user
    User(String),
}

impl SubscriptionFilter {
    /// Filter for an optional target user
    #[must_use]
    pub fn for_target(target_user_id: Option<&str>) -> Self {
        target_user_id.map_or(Self::All, |id| Self::User(id.to_string()))
    }

    /// Whether a subscription is selected
    #[must_use]
    pub fn matches(&self, subscription: &PushSubscription) -> bool {
        match self {
            Self::All => true,
            Self::User(id) => subscription.user_id.as_deref() == Some(id.as_str()),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_https_endpoint() {
        let sub = PushSubscription::new("https://push.example.com/abc", fixtures::keys(), None);
        assert!(sub.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_http_endpoint() {
        let sub = PushSubscription::new("http://push.example.com/abc", fixtures::keys(), None);
        assert!(matches!(sub.validate(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_validate_rejects_short_auth() {
        let mut keys = fixtures::keys();
        keys.auth = URL_SAFE_NO_PAD.encode([1u8; 8]);
        let sub = PushSubscription::new("https://push.example.com/abc", keys, None);
        assert!(sub.validate().is_err());
    }

    #[test]
    fn test_padded_base64_is_accepted() {
        let mut keys = fixtures::keys();
        keys.auth.push_str("==");
        assert_eq!(keys.decode_auth().unwrap().len(), AUTH_SECRET_LEN);
    }

    #[test]
    fn test_filter_matches_owner_only() {
        let owned = PushSubscription::new("https://a", fixtures::keys(), Some("u1".into()));
        let anonymous = PushSubscription::new("https://b", fixtures::keys(), None);

        let filter = SubscriptionFilter::for_target(Some("u1"));
        assert!(filter.matches(&owned));
        assert!(!filter.matches(&anonymous));
        assert!(SubscriptionFilter::for_target(None).matches(&anonymous));
    }

    #[test]
    fn test_serde_uses_camel_case() {
        let sub = PushSubscription::new("https://a", fixtures::keys(), Some("u1".into()));
        let json = serde_json::to_value(&sub).unwrap();
        assert_eq!(json["userId"], "u1");
        assert!(json.get("createdAt").is_some());
    }
}
