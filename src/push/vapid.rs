//! VAPID application-server identification (RFC 8292)
//!
//! Push services accept messages only with an `Authorization: vapid t=<jwt>,
//! k=<public key>` header, where the JWT is ES256-signed with the
//! application server's P-256 key and scoped to the push service origin.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use ring::rand::SystemRandom;
use ring::signature::{ECDSA_P256_SHA256_FIXED_SIGNING, EcdsaKeyPair};
use serde::Serialize;

use super::subscription::{P256_PUBLIC_KEY_LEN, decode_base64url};
use crate::config::{PushConfig, resolve_env_ref};
use crate::{Error, Result};

/// Lifetime of each signed token (push services cap it at 24h)
pub const TOKEN_LIFETIME: Duration = Duration::from_secs(12 * 60 * 60);

/// Length of a raw P-256 private scalar
const PRIVATE_KEY_LEN: usize = 32;

/// PKCS#8 v1 prefix for a P-256 key, up to the private scalar
const PKCS8_PREFIX: [u8; 36] = [
    0x30, 0x81, 0x87, 0x02, 0x01, 0x00, 0x30, 0x13, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d,
    0x02, 0x01, 0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, 0x04, 0x6d, 0x30,
    0x6b, 0x02, 0x01, 0x01, 0x04, 0x20,
];
/// PKCS#8 bytes between the private scalar and the public point
const PKCS8_MIDDLE: [u8; 5] = [0xa1, 0x44, 0x03, 0x42, 0x00];
const PKCS8_LEN: usize = PKCS8_PREFIX.len() + PRIVATE_KEY_LEN + PKCS8_MIDDLE.len() + P256_PUBLIC_KEY_LEN;

/// Application server key pair
pub struct VapidKeys {
    public_key: Vec<u8>,
    encoding_key: EncodingKey,
}

impl std::fmt::Debug for VapidKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VapidKeys")
            .field("public_key", &self.public_key_base64())
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct Claims<'a> {
    aud: &'a str,
    exp: i64,
    sub: &'a str,
}

impl VapidKeys {
    /// Build from base64url public point and private scalar
    pub fn from_base64(public_key: &str, private_key: &str) -> Result<Self> {
        let public = decode_base64url(public_key)
            .map_err(|e| Error::Config(format!("VAPID public key is not base64url: {e}")))?;
        let private = decode_base64url(private_key)
            .map_err(|e| Error::Config(format!("VAPID private key is not base64url: {e}")))?;
        Self::from_raw(&public, &private)
    }

    /// Build from raw key bytes
    pub fn from_raw(public_key: &[u8], private_key: &[u8]) -> Result<Self> {
        if public_key.len() != P256_PUBLIC_KEY_LEN || public_key[0] != 0x04 {
            return Err(Error::Config(format!(
                "VAPID public key must be an uncompressed P-256 point ({P256_PUBLIC_KEY_LEN} bytes)"
            )));
        }
        if private_key.len() != PRIVATE_KEY_LEN {
            return Err(Error::Config(format!(
                "VAPID private key must be {PRIVATE_KEY_LEN} bytes"
            )));
        }

        let mut der = Vec::with_capacity(PKCS8_LEN);
        der.extend_from_slice(&PKCS8_PREFIX);
        der.extend_from_slice(private_key);
        der.extend_from_slice(&PKCS8_MIDDLE);
        der.extend_from_slice(public_key);

        // Rejects a public key that does not belong to the private scalar
        EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &der, &SystemRandom::new())
            .map_err(|e| Error::Config(format!("VAPID key pair is invalid: {e}")))?;

        Ok(Self {
            public_key: public_key.to_vec(),
            encoding_key: EncodingKey::from_ec_der(&der),
        })
    }

    /// Load keys from push configuration, `None` when not configured
    pub fn from_config(config: &PushConfig) -> Result<Option<Self>> {
        match (&config.vapid_public_key, &config.vapid_private_key) {
            (Some(public), Some(private)) => Ok(Some(Self::from_base64(
                &resolve_env_ref(public),
                &resolve_env_ref(private),
            )?)),
            (None, None) => Ok(None),
            _ => Err(Error::Config(
                "push.vapid_public_key and push.vapid_private_key must be set together".to_string(),
            )),
        }
    }

    /// Generate a fresh key pair, returned as base64url `(public, private)`
    pub fn generate() -> Result<(String, String)> {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .map_err(|_| Error::Internal("VAPID key generation failed".to_string()))?;
        let der = pkcs8.as_ref();
        if der.len() != PKCS8_LEN || der[..PKCS8_PREFIX.len()] != PKCS8_PREFIX {
            return Err(Error::Internal("Unexpected PKCS#8 layout".to_string()));
        }

        let private_start = PKCS8_PREFIX.len();
        let public_start = private_start + PRIVATE_KEY_LEN + PKCS8_MIDDLE.len();
        Ok((
            URL_SAFE_NO_PAD.encode(&der[public_start..]),
            URL_SAFE_NO_PAD.encode(&der[private_start..private_start + PRIVATE_KEY_LEN]),
        ))
    }

    /// Public key as sent in the `k=` parameter and used by browsers
    #[must_use]
    pub fn public_key_base64(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.public_key)
    }

    /// `Authorization` header value for a message to `endpoint`
    pub fn authorization(&self, endpoint: &str, subject: &str) -> Result<String> {
        let audience = audience(endpoint)?;
        let lifetime = i64::try_from(TOKEN_LIFETIME.as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            aud: &audience,
            exp: Utc::now().timestamp() + lifetime,
            sub: subject,
        };
        let token = jsonwebtoken::encode(&Header::new(Algorithm::ES256), &claims, &self.encoding_key)
            .map_err(|e| Error::Push(format!("VAPID signing failed: {e}")))?;
        Ok(format!("vapid t={token}, k={}", self.public_key_base64()))
    }
}

/// Origin of the push service, used as the token audience
fn audience(endpoint: &str) -> Result<String> {
    let url = url::Url::parse(endpoint)
        .map_err(|e| Error::InvalidInput(format!("endpoint is not a URL: {e}")))?;
    Ok(url.origin().ascii_serialization())
}

#[cfg(test)]
mod tests {
    use ring::signature::{ECDSA_P256_SHA256_FIXED, UnparsedPublicKey};

    use super::*;

    fn parts(header: &str) -> (String, String) {
        let rest = header.strip_prefix("vapid t=").unwrap();
        let (token, key) = rest.split_once(", k=").unwrap();
        (token.to_string(), key.to_string())
    }

    #[test]
    fn test_generated_keys_load() {
        let (public, private) = VapidKeys::generate().unwrap();
        let keys = VapidKeys::from_base64(&public, &private).unwrap();
        assert_eq!(keys.public_key_base64(), public);
    }

    #[test]
    fn test_mismatched_pair_rejected() {
        let (public, _) = VapidKeys::generate().unwrap();
        let (_, other_private) = VapidKeys::generate().unwrap();
        assert!(matches!(
            VapidKeys::from_base64(&public, &other_private),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_authorization_header_verifies() {
        let (public, private) = VapidKeys::generate().unwrap();
        let keys = VapidKeys::from_base64(&public, &private).unwrap();

        let header = keys
            .authorization("https://fcm.googleapis.com/fcm/send/abc", "mailto:ops@example.com")
            .unwrap();
        let (token, key) = parts(&header);
        assert_eq!(key, public);

        let segments: Vec<&str> = token.split('.').collect();
        assert_eq!(segments.len(), 3);

        let header_json: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(segments[0]).unwrap()).unwrap();
        assert_eq!(header_json["alg"], "ES256");

        let claims: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(segments[1]).unwrap()).unwrap();
        assert_eq!(claims["aud"], "https://fcm.googleapis.com");
        assert_eq!(claims["sub"], "mailto:ops@example.com");
        assert!(claims["exp"].as_i64().unwrap() > Utc::now().timestamp());

        let signature = URL_SAFE_NO_PAD.decode(segments[2]).unwrap();
        let signing_input = format!("{}.{}", segments[0], segments[1]);
        let verifier = UnparsedPublicKey::new(
            &ECDSA_P256_SHA256_FIXED,
            URL_SAFE_NO_PAD.decode(&public).unwrap(),
        );
        assert!(verifier.verify(signing_input.as_bytes(), &signature).is_ok());
    }

    #[test]
    fn test_from_config_requires_both_keys() {
        let config = PushConfig {
            vapid_public_key: Some("abc".to_string()),
            ..PushConfig::default()
        };
        assert!(VapidKeys::from_config(&config).is_err());
        assert!(VapidKeys::from_config(&PushConfig::default()).unwrap().is_none());
    }

    #[test]
    fn test_audience_is_origin() {
        assert_eq!(
            audience("https://updates.push.services.mozilla.com:443/wpush/v2/x").unwrap(),
            "https://updates.push.services.mozilla.com"
        );
    }
}
