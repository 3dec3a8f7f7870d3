//! Passphrase-protected export bundles
//!
//! A bundle is a small JSON document:
//!
//! ```json
//! {"v": 1, "kdf": "PBKDF2-SHA256", "cipher": "ChaCha20-Poly1305",
//!  "salt": "<base64>", "iv": "<base64>", "data": "<base64>"}
//! ```
//!
//! `data` is the ciphertext of `{pages, tags, createdAt}` followed by the
//! 16-byte authentication tag. A fresh salt and nonce are drawn per export.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::{self, CryptoError, EncryptedPayload, TAG_SIZE};
use crate::models::{RawSnapshot, Snapshot};
use crate::storage::files::atomic_write;

pub const BUNDLE_VERSION: u32 = 1;
pub const KDF_ID: &str = "PBKDF2-SHA256";
pub const CIPHER_ID: &str = "ChaCha20-Poly1305";

#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("invalid bundle: {0}")]
    Format(String),

    /// Wrong passphrase or a modified file
    #[error("wrong passphrase or corrupted bundle")]
    Authentication,

    #[error(transparent)]
    Crypto(CryptoError),

    #[error("bundle I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CryptoError> for BundleError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Authentication => BundleError::Authentication,
            other => BundleError::Crypto(other),
        }
    }
}

/// The on-disk bundle envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    pub v: u32,
    pub kdf: String,
    pub cipher: String,
    pub salt: String,
    pub iv: String,
    pub data: String,
}

#[derive(Serialize, Deserialize)]
struct BundlePayload {
    #[serde(default)]
    pages: Value,
    #[serde(default)]
    tags: Value,
    #[serde(rename = "createdAt", default)]
    created_at: Option<i64>,
}

impl Bundle {
    /// Encrypt a snapshot under a passphrase
    pub fn seal(snapshot: &Snapshot, passphrase: &str) -> Result<Self, BundleError> {
        let raw = RawSnapshot::from(snapshot);
        let payload = BundlePayload {
            pages: raw.pages,
            tags: raw.tags,
            created_at: Some(crate::models::now_millis()),
        };
        let plaintext =
            serde_json::to_vec(&payload).map_err(|e| BundleError::Format(e.to_string()))?;

        let salt = crypto::generate_salt();
        let key = crypto::derive_key(passphrase, &salt)?;
        let sealed = crypto::encrypt(&plaintext, &key)?;

        let mut data = sealed.ciphertext;
        data.extend_from_slice(&sealed.auth_tag);

        Ok(Self {
            v: BUNDLE_VERSION,
            kdf: KDF_ID.to_string(),
            cipher: CIPHER_ID.to_string(),
            salt: STANDARD.encode(salt),
            iv: STANDARD.encode(&sealed.iv),
            data: STANDARD.encode(data),
        })
    }

    /// Decrypt with the export passphrase. Nothing is returned unless the
    /// authentication tag verifies.
    pub fn open(&self, passphrase: &str) -> Result<RawSnapshot, BundleError> {
        if self.v != BUNDLE_VERSION {
            return Err(BundleError::Format(format!("unsupported version {}", self.v)));
        }
        if self.kdf != KDF_ID {
            return Err(BundleError::Format(format!("unsupported kdf {}", self.kdf)));
        }
        if self.cipher != CIPHER_ID {
            return Err(BundleError::Format(format!(
                "unsupported cipher {}",
                self.cipher
            )));
        }

        let salt = decode_field("salt", &self.salt)?;
        let iv = decode_field("iv", &self.iv)?;
        let mut data = decode_field("data", &self.data)?;
        if data.len() < TAG_SIZE {
            return Err(BundleError::Format("data shorter than tag".to_string()));
        }
        let auth_tag = data.split_off(data.len() - TAG_SIZE);

        let key = crypto::derive_key(passphrase, &salt)?;
        let plaintext = crypto::decrypt(
            &EncryptedPayload {
                iv,
                ciphertext: data,
                auth_tag,
            },
            &key,
        )?;

        let payload: BundlePayload = serde_json::from_slice(&plaintext)
            .map_err(|e| BundleError::Format(format!("payload is not valid JSON: {}", e)))?;
        Ok(RawSnapshot {
            pages: payload.pages,
            tags: payload.tags,
            timestamp: payload.created_at,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, BundleError> {
        serde_json::to_vec_pretty(self).map_err(|e| BundleError::Format(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BundleError> {
        serde_json::from_slice(bytes).map_err(|e| BundleError::Format(e.to_string()))
    }

    pub fn write_to(&self, path: &Path) -> Result<(), BundleError> {
        atomic_write(path, &self.to_bytes()?)
            .map_err(|e| BundleError::Io(std::io::Error::other(e.to_string())))
    }

    pub fn read_from(path: &Path) -> Result<Self, BundleError> {
        Self::from_bytes(&std::fs::read(path)?)
    }
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>, BundleError> {
    STANDARD
        .decode(value)
        .map_err(|e| BundleError::Format(format!("{} is not base64: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Entry, Page, Tag};
    use tempfile::tempdir;

    fn snapshot() -> Snapshot {
        Snapshot::new(
            vec![Entry::Page(Page::new("Travel plans"))],
            vec![Tag::new("trips")],
        )
    }

    #[test]
    fn test_seal_and_open() {
        let bundle = Bundle::seal(&snapshot(), "correct").unwrap();
        assert_eq!(bundle.v, 1);
        assert_eq!(bundle.kdf, "PBKDF2-SHA256");

        let raw = bundle.open("correct").unwrap();
        assert_eq!(raw.pages[0]["title"], "Travel plans");
        assert_eq!(raw.tags[0]["name"], "trips");
        assert!(raw.timestamp.is_some());
    }

    #[test]
    fn test_wrong_passphrase_yields_nothing() {
        let bundle = Bundle::seal(&snapshot(), "correct").unwrap();
        let result = bundle.open("wrong");
        assert!(matches!(result, Err(BundleError::Authentication)));
    }

    #[test]
    fn test_tampered_data_fails_authentication() {
        let mut bundle = Bundle::seal(&snapshot(), "correct").unwrap();
        let mut data = STANDARD.decode(&bundle.data).unwrap();
        data[0] ^= 0xff;
        bundle.data = STANDARD.encode(data);
        assert!(matches!(
            bundle.open("correct"),
            Err(BundleError::Authentication)
        ));
    }

    #[test]
    fn test_unknown_algorithms_are_rejected() {
        let mut bundle = Bundle::seal(&snapshot(), "pw").unwrap();
        bundle.cipher = "AES-ECB".to_string();
        assert!(matches!(bundle.open("pw"), Err(BundleError::Format(_))));

        let mut bundle = Bundle::seal(&snapshot(), "pw").unwrap();
        bundle.salt = "%%%".to_string();
        assert!(matches!(bundle.open("pw"), Err(BundleError::Format(_))));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.folio");

        Bundle::seal(&snapshot(), "pw").unwrap().write_to(&path).unwrap();
        let value: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        for field in ["v", "kdf", "cipher", "salt", "iv", "data"] {
            assert!(value.get(field).is_some(), "missing {}", field);
        }

        let raw = Bundle::read_from(&path).unwrap().open("pw").unwrap();
        assert_eq!(raw.pages.as_array().unwrap().len(), 1);
        assert!(matches!(
            Bundle::read_from(&dir.path().join("missing")),
            Err(BundleError::Io(_))
        ));
    }
}
