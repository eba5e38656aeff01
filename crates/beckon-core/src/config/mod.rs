//! Configuration management for Beckon.
//!
//! This module handles loading, saving, and managing Beckon configuration.
//!
//! ## Configuration File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/beckon/config.toml` |
//! | macOS | `~/Library/Application Support/Beckon/config.toml` |
//! | Windows | `%APPDATA%\Beckon\config.toml` |
//!
//! ## Example
//!
//! ```rust,ignore
//! use beckon_core::config::Config;
//!
//! let config = Config::load()?;
//! println!("Shared folder: {:?}", config.share.directory);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Main configuration struct for Beckon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,
    /// Shared folder settings
    pub share: ShareConfig,
    /// Signaling settings
    pub signal: SignalConfig,
    /// Holder file server settings
    pub server: ServerConfig,
    /// Transfer request settings
    pub transfer: TransferConfig,
    /// Peer discovery settings
    pub discovery: DiscoveryConfig,
}

/// General configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Display name of this device
    pub device_name: String,
    /// Default directory received files are saved to
    pub download_dir: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            device_name: hostname::get().map_or_else(
                |_| "Beckon Device".to_string(),
                |h| h.to_string_lossy().to_string(),
            ),
            download_dir: None,
        }
    }
}

/// Shared folder configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShareConfig {
    /// Folder that is watched for arriving files and served to peers
    pub directory: Option<PathBuf>,
    /// File name patterns never reported as arrivals
    pub exclude_patterns: Vec<String>,
    /// Debounce window for watcher events (ms)
    pub debounce_ms: u64,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            directory: None,
            exclude_patterns: vec![
                ".DS_Store".into(),
                "Thumbs.db".into(),
                "*.swp".into(),
                "*.tmp".into(),
                "*.part".into(),
                "*.crdownload".into(),
                format!("*{}", crate::file::PARTIAL_SUFFIX),
            ],
            debounce_ms: crate::DEFAULT_DEBOUNCE_MS,
        }
    }
}

/// Signaling configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Default holder to notify (`IP` or `IP:PORT`)
    pub peer: Option<String>,
    /// Port the signal listener binds in holder mode
    pub listen_port: u16,
    /// Connect timeout for outgoing notifications
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            peer: None,
            listen_port: crate::DEFAULT_SIGNAL_PORT,
            connect_timeout: Duration::from_secs(crate::DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }
}

/// Holder file server configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port the file server binds in holder mode
    pub port: u16,
    /// Bind to localhost only
    pub localhost_only: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: crate::DEFAULT_FILE_PORT,
            localhost_only: false,
        }
    }
}

/// Transfer request configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Fail pending requests after this long (None waits forever)
    #[serde(with = "humantime_serde::option", skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<Duration>,
    /// What to do when a file is requested again while in flight
    pub duplicate_policy: DuplicatePolicy,
    /// How remote files reach this device
    pub mode: DeliveryMode,
    /// Compare content digests after copying
    pub verify_checksum: bool,
    /// Where fetched files are staged before the final copy
    pub staging_dir: Option<PathBuf>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            request_timeout: None,
            duplicate_policy: DuplicatePolicy::Reject,
            mode: DeliveryMode::Push,
            verify_checksum: true,
            staging_dir: None,
        }
    }
}

/// Peer discovery configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Look for a holder when no peer is configured, and answer queries in
    /// holder mode
    pub enabled: bool,
    /// UDP port discovery queries are sent to and answered on
    pub port: u16,
    /// How long a scan waits for answers
    #[serde(with = "humantime_serde")]
    pub scan_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: crate::discovery::DEFAULT_DISCOVERY_PORT,
            scan_timeout: crate::discovery::DEFAULT_SCAN_WINDOW,
        }
    }
}

/// Policy for a second request of a file name that is already in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Refuse the second request with `DuplicateRequest`
    #[default]
    Reject,
    /// Return the status of the live request instead of creating a new one
    Attach,
}

/// How a remote holder's file reaches this device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Wait for the file to land in the shared folder, unless the holder
    /// answers that it serves the file, in which case it is fetched
    #[default]
    Push,
    /// Always pull the file from the holder's file server
    Fetch,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| crate::error::Error::ConfigError(format!("Failed to read config: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| crate::error::Error::ConfigError(format!("Failed to parse config: {e}")))
    }

    /// Save configuration to the default location.
    ///
    /// Creates the configuration directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be written.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                crate::error::Error::ConfigError(format!("Failed to create config directory: {e}"))
            })?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| {
            crate::error::Error::ConfigError(format!("Failed to serialize config: {e}"))
        })?;

        std::fs::write(&path, content)
            .map_err(|e| crate::error::Error::ConfigError(format!("Failed to write config: {e}")))
    }

    /// Get the default configuration directory path.
    #[must_use]
    pub fn config_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "beckon", "Beckon")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the full path to the configuration file.
    #[must_use]
    pub fn config_path() -> PathBuf {
        Self::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }

    /// Directory fetched files are staged in.
    ///
    /// Falls back to the platform cache directory, then the system temp dir.
    #[must_use]
    pub fn staging_dir(&self) -> PathBuf {
        self.transfer.staging_dir.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("com", "beckon", "Beckon").map_or_else(
                || std::env::temp_dir().join("beckon-staging"),
                |dirs| dirs.cache_dir().join("staging"),
            )
        })
    }
}

/// Parse a human-readable duration such as `30s`, `5m` or `1h`.
///
/// # Errors
///
/// Returns an error if the string has no known unit suffix or the number is invalid.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    let invalid = || crate::error::Error::InvalidInput(format!("invalid duration '{s}'"));

    let (number, multiplier) = if let Some(secs) = s.strip_suffix('s') {
        (secs, 1)
    } else if let Some(mins) = s.strip_suffix('m') {
        (mins, 60)
    } else if let Some(hours) = s.strip_suffix('h') {
        (hours, 60 * 60)
    } else {
        return Err(invalid());
    };

    number
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .map(Duration::from_secs)
        .ok_or_else(invalid)
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        #[allow(clippy::ref_option)]
        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|s| crate::config::parse_duration(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}
