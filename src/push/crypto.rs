//! Web Push message encryption (RFC 8291, `aes128gcm` content coding of RFC 8188)
//!
//! Each message gets a fresh ephemeral P-256 key pair and random salt. The
//! output is a single record:
//!
//! ```text
//! salt (16) | record size (4, BE) | key id length (1) | sender public key (65) | ciphertext
//! ```

use ring::{aead, agreement, hkdf, rand::SecureRandom, rand::SystemRandom};

use super::subscription::{P256_PUBLIC_KEY_LEN, SubscriptionKeys};
use crate::{Error, Result};

/// Record size advertised in the header
pub const RECORD_SIZE: u32 = 4096;
/// Salt length
pub const SALT_LEN: usize = 16;
/// Header length: salt, record size, key id length, sender key
pub const HEADER_LEN: usize = SALT_LEN + 4 + 1 + P256_PUBLIC_KEY_LEN;
/// AES-GCM tag length
const TAG_LEN: usize = 16;
/// Padding delimiter marking the last (only) record
const LAST_RECORD_DELIMITER: u8 = 0x02;
/// Largest plaintext that fits in one record
pub const MAX_PLAINTEXT_LEN: usize = RECORD_SIZE as usize - TAG_LEN - 1;

/// HKDF output length marker
struct Len(usize);

impl hkdf::KeyType for Len {
    fn len(&self) -> usize {
        self.0
    }
}

fn crypto_err(step: &str) -> Error {
    Error::Push(format!("Payload encryption failed at {step}"))
}

fn expand(prk: &hkdf::Prk, info: &[&[u8]], out: &mut [u8], step: &str) -> Result<()> {
    prk.expand(info, Len(out.len()))
        .and_then(|okm| okm.fill(out))
        .map_err(|_| crypto_err(step))
}

/// Encrypt `plaintext` for the subscription owning `keys`
pub fn encrypt(keys: &SubscriptionKeys, plaintext: &[u8]) -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let mut salt = [0u8; SALT_LEN];
    rng.fill(&mut salt).map_err(|_| crypto_err("salt"))?;
    let sender_key = agreement::EphemeralPrivateKey::generate(&agreement::ECDH_P256, &rng)
        .map_err(|_| crypto_err("key generation"))?;
    encrypt_with(keys, plaintext, sender_key, salt)
}

/// Encrypt with caller-supplied ephemeral key and salt
pub(crate) fn encrypt_with(
    keys: &SubscriptionKeys,
    plaintext: &[u8],
    sender_key: agreement::EphemeralPrivateKey,
    salt: [u8; SALT_LEN],
) -> Result<Vec<u8>> {
    if plaintext.len() > MAX_PLAINTEXT_LEN {
        return Err(Error::Push(format!(
            "Payload of {} bytes exceeds the {MAX_PLAINTEXT_LEN} byte limit",
            plaintext.len()
        )));
    }

    let client_public = keys.decode_p256dh()?;
    let auth_secret = keys.decode_auth()?;

    let sender_public = sender_key
        .compute_public_key()
        .map_err(|_| crypto_err("public key"))?;
    let sender_public = sender_public.as_ref().to_vec();

    let peer = agreement::UnparsedPublicKey::new(&agreement::ECDH_P256, &client_public);
    let shared_secret = agreement::agree_ephemeral(sender_key, &peer, <[u8]>::to_vec)
        .map_err(|_| Error::Push("Subscription public key is not a valid P-256 point".to_string()))?;

    // IKM = HKDF(auth_secret, ecdh_secret, "WebPush: info" || 0 || ua_public || as_public)
    let auth_prk = hkdf::Salt::new(hkdf::HKDF_SHA256, &auth_secret).extract(&shared_secret);
    let mut ikm = [0u8; 32];
    expand(
        &auth_prk,
        &[b"WebPush: info\0", &client_public, &sender_public],
        &mut ikm,
        "ikm",
    )?;

    let prk = hkdf::Salt::new(hkdf::HKDF_SHA256, &salt).extract(&ikm);
    let mut cek = [0u8; 16];
    expand(&prk, &[b"Content-Encoding: aes128gcm\0"], &mut cek, "cek")?;
    let mut nonce = [0u8; aead::NONCE_LEN];
    expand(&prk, &[b"Content-Encoding: nonce\0"], &mut nonce, "nonce")?;

    let key = aead::UnboundKey::new(&aead::AES_128_GCM, &cek).map_err(|_| crypto_err("cek"))?;
    let key = aead::LessSafeKey::new(key);

    let mut record = Vec::with_capacity(plaintext.len() + 1 + TAG_LEN);
    record.extend_from_slice(plaintext);
    record.push(LAST_RECORD_DELIMITER);
    key.seal_in_place_append_tag(
        aead::Nonce::assume_unique_for_key(nonce),
        aead::Aad::empty(),
        &mut record,
    )
    .map_err(|_| crypto_err("seal"))?;

    let mut body = Vec::with_capacity(HEADER_LEN + record.len());
    body.extend_from_slice(&salt);
    body.extend_from_slice(&RECORD_SIZE.to_be_bytes());
    #[allow(clippy::cast_possible_truncation)]
    body.push(sender_public.len() as u8);
    body.extend_from_slice(&sender_public);
    body.extend_from_slice(&record);
    Ok(body)
}
