//! Device identity
//!
//! Each installation has a stable device id, generated on first run and
//! kept in the data directory. Peers use it to recognise each other across
//! sessions; it carries no key material.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::models::{new_id, now_millis};

const IDENTITY_FILE: &str = "device.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    pub device_id: String,
    /// Milliseconds since the epoch
    pub created_at: i64,
}

impl DeviceIdentity {
    pub fn path(config: &Config) -> PathBuf {
        config.data_dir.join(IDENTITY_FILE)
    }

    /// Whether this device has been given an id yet
    pub fn exists(config: &Config) -> bool {
        Self::path(config).exists()
    }

    /// Load the device identity, creating one on first run
    pub fn load_or_create(config: &Config) -> Result<Self> {
        let path = Self::path(config);
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read device identity: {:?}", path))?;
            match serde_json::from_str::<DeviceIdentity>(&content) {
                Ok(identity) if !identity.device_id.trim().is_empty() => return Ok(identity),
                Ok(_) => tracing::warn!("Device identity at {:?} is blank, regenerating", path),
                Err(e) => tracing::warn!("Device identity at {:?} is corrupt ({}), regenerating", path, e),
            }
        }

        let identity = DeviceIdentity {
            device_id: new_id(),
            created_at: now_millis(),
        };
        fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", config.data_dir))?;
        let content = serde_json::to_string_pretty(&identity)?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write device identity: {:?}", path))?;
        tracing::info!("Created device identity {}", identity.device_id);
        Ok(identity)
    }
}
