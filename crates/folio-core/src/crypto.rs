//! Crypto primitives: passphrase key derivation, authenticated encryption,
//! ephemeral key material for device pairing.
//!
//! Passphrase-derived keys protect exported bundles. Ephemeral keys protect
//! device-to-device sync sessions. The two never share key material.

use chacha20poly1305::aead::{AeadInPlace, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce, Tag};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

/// PBKDF2-HMAC-SHA256 rounds for passphrase-derived keys
pub const KDF_ITERATIONS: u32 = 250_000;

/// Symmetric key length in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Minimum salt length accepted by [`derive_key`]
pub const SALT_SIZE: usize = 16;

/// Nonce length for ChaCha20-Poly1305
pub const NONCE_SIZE: usize = 12;

/// Authentication tag length
pub const TAG_SIZE: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Tag did not verify: tampered ciphertext or wrong key
    #[error("authentication failed: wrong key or tampered data")]
    Authentication,
    #[error("invalid encrypted payload: {0}")]
    Format(String),
    #[error("key derivation failed: {0}")]
    Kdf(String),
}

/// A 256-bit symmetric key.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        SymmetricKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// Output of [`encrypt`]. The nonce is always generated internally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    #[serde(with = "serde_bytes")]
    pub iv: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(rename = "authTag", with = "serde_bytes")]
    pub auth_tag: Vec<u8>,
}

/// Generate a fresh random salt for one passphrase-protected secret.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive a 256-bit key from a passphrase with PBKDF2-HMAC-SHA256.
pub fn derive_key(passphrase: &str, salt: &[u8]) -> Result<SymmetricKey, CryptoError> {
    if salt.len() < SALT_SIZE {
        return Err(CryptoError::Kdf(format!(
            "salt must be at least {} bytes, got {}",
            SALT_SIZE,
            salt.len()
        )));
    }
    let mut key = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, KDF_ITERATIONS, &mut key);
    Ok(SymmetricKey(key))
}

/// Fresh random key for a pairing session, independent of any passphrase.
pub fn generate_ephemeral_key() -> SymmetricKey {
    let mut key = [0u8; KEY_SIZE];
    OsRng.fill_bytes(&mut key);
    SymmetricKey(key)
}

/// Encrypt with ChaCha20-Poly1305 under a fresh random nonce.
pub fn encrypt(plaintext: &[u8], key: &SymmetricKey) -> Result<EncryptedPayload, CryptoError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key.0));
    let mut iv = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut iv);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&iv), b"", &mut buffer)
        .map_err(|_| CryptoError::Format("plaintext too large".to_string()))?;

    Ok(EncryptedPayload {
        iv: iv.to_vec(),
        ciphertext: buffer,
        auth_tag: tag.to_vec(),
    })
}

/// Decrypt and verify. Returns nothing on failure.
pub fn decrypt(payload: &EncryptedPayload, key: &SymmetricKey) -> Result<Vec<u8>, CryptoError> {
    if payload.iv.len() != NONCE_SIZE {
        return Err(CryptoError::Format(format!(
            "iv must be {} bytes, got {}",
            NONCE_SIZE,
            payload.iv.len()
        )));
    }
    if payload.auth_tag.len() != TAG_SIZE {
        return Err(CryptoError::Format(format!(
            "auth tag must be {} bytes, got {}",
            TAG_SIZE,
            payload.auth_tag.len()
        )));
    }

    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key.0));
    let mut buffer = payload.ciphertext.clone();
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(&payload.iv),
            b"",
            &mut buffer,
            Tag::from_slice(&payload.auth_tag),
        )
        .map_err(|_| CryptoError::Authentication)?;
    Ok(buffer)
}
