//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/folio/config.toml)
//! 3. Environment variables (FOLIO_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variable prefix
const ENV_PREFIX: &str = "FOLIO";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory for local tiers (SQLite database, key-value files, cache mirror)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Name shown to other devices during discovery
    #[serde(default)]
    pub device_name: Option<String>,

    /// Directory owned by a wrapping desktop host.
    ///
    /// When set, the host tier becomes authoritative and the local tiers
    /// are bypassed.
    #[serde(default)]
    pub host_dir: Option<PathBuf>,

    /// Debounce window for coalescing save requests
    #[serde(default = "default_save_debounce_ms")]
    pub save_debounce_ms: u64,

    /// Delay before the single automatic retry of a failed save
    #[serde(default = "default_save_retry_delay_ms")]
    pub save_retry_delay_ms: u64,

    /// Interval between DEVICE_AVAILABLE broadcasts while hosting
    #[serde(default = "default_advertise_interval_ms")]
    pub advertise_interval_ms: u64,

    /// Upper bound on transport negotiation with a peer
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// UDP port of the LAN discovery group
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,

    /// TCP port for sync connections (0 picks a free port)
    #[serde(default)]
    pub transport_port: u16,

    /// Log file path (stderr when unset)
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            device_name: None,
            host_dir: None,
            save_debounce_ms: default_save_debounce_ms(),
            save_retry_delay_ms: default_save_retry_delay_ms(),
            advertise_interval_ms: default_advertise_interval_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            discovery_port: default_discovery_port(),
            transport_port: 0,
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (FOLIO_DATA_DIR, FOLIO_HOST_DIR, FOLIO_DEVICE_NAME, ...)
    /// 2. Config file (~/.config/folio/config.toml or FOLIO_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration, preferring an explicit path over the default one
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Build a configuration rooted at `data_dir`, everything else default
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        // Empty string clears the host tier
        if let Ok(val) = std::env::var(format!("{}_HOST_DIR", ENV_PREFIX)) {
            self.host_dir = if val.is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }

        if let Ok(val) = std::env::var(format!("{}_DEVICE_NAME", ENV_PREFIX)) {
            self.device_name = if val.is_empty() { None } else { Some(val) };
        }

        if let Ok(val) = std::env::var(format!("{}_DISCOVERY_PORT", ENV_PREFIX)) {
            if let Ok(port) = val.parse() {
                self.discovery_port = port;
            }
        }

        if let Ok(val) = std::env::var(format!("{}_TRANSPORT_PORT", ENV_PREFIX)) {
            if let Ok(port) = val.parse() {
                self.transport_port = port;
            }
        }
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to_path(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with FOLIO_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("folio")
            .join("config.toml")
    }

    /// Path to the SQLite database (structured tier)
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("folio.db")
    }

    /// Directory of the flat key-value tier
    pub fn kv_dir(&self) -> PathBuf {
        self.data_dir.join("kv")
    }

    /// Directory of the cache mirror tier
    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }

    /// Name announced to peers, falling back to the host name
    pub fn effective_device_name(&self) -> String {
        if let Some(ref name) = self.device_name {
            return name.clone();
        }
        std::env::var("HOSTNAME")
            .ok()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "Folio device".to_string())
    }

    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }

    pub fn save_retry_delay(&self) -> Duration {
        Duration::from_millis(self.save_retry_delay_ms)
    }

    pub fn advertise_interval(&self) -> Duration {
        Duration::from_millis(self.advertise_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("folio")
}

fn default_save_debounce_ms() -> u64 {
    150
}

fn default_save_retry_delay_ms() -> u64 {
    500
}

fn default_advertise_interval_ms() -> u64 {
    2000
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_discovery_port() -> u16 {
    45460
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &[
        "FOLIO_DATA_DIR",
        "FOLIO_HOST_DIR",
        "FOLIO_DEVICE_NAME",
        "FOLIO_DISCOVERY_PORT",
        "FOLIO_TRANSPORT_PORT",
    ];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.host_dir.is_none());
        assert_eq!(config.save_debounce_ms, 150);
        assert_eq!(config.advertise_interval(), Duration::from_secs(2));
        assert!(config.data_dir.ends_with("folio"));
    }

    #[test]
    fn test_file_paths() {
        let config = Config::with_data_dir("/data/folio");
        assert!(config.sqlite_path().ends_with("folio.db"));
        assert!(config.kv_dir().ends_with("kv"));
        assert!(config.cache_dir().ends_with("cache"));
    }

    #[test]
    fn test_env_override_host_dir() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("FOLIO_HOST_DIR", "/host/store");
        config.apply_env_overrides();
        assert_eq!(config.host_dir, Some(PathBuf::from("/host/store")));

        // Empty string clears it
        env::set_var("FOLIO_HOST_DIR", "");
        config.apply_env_overrides();
        assert!(config.host_dir.is_none());
    }

    #[test]
    fn test_env_override_ports() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("FOLIO_DISCOVERY_PORT", "50000");
        env::set_var("FOLIO_TRANSPORT_PORT", "not-a-port");
        config.apply_env_overrides();

        assert_eq!(config.discovery_port, 50000);
        assert_eq!(config.transport_port, 0);
    }

    #[test]
    fn test_load_from_str() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            data_dir = "/custom/data"
            device_name = "laptop"
            save_debounce_ms = 120
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/custom/data"));
        assert_eq!(config.effective_device_name(), "laptop");
        assert_eq!(config.save_debounce(), Duration::from_millis(120));
        assert_eq!(config.connect_timeout_secs, 10);
    }

    #[test]
    fn test_save_and_reload() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::with_data_dir(temp_dir.path().join("data"));
        config.device_name = Some("desk".to_string());
        config.save_to_path(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded.device_name.as_deref(), Some("desk"));
        assert!(loaded.data_dir.exists());
    }
}
