//! Configuration for the pH-meter session manager
//!
//! Supports JSON and TOML file formats, chosen by file extension, stored in
//! the platform config directory by default.
//!
//! Configuration is organized into logical sections:
//! - Connection settings (auto-connect, line parameters)
//! - Exchange settings (query bytes, timeout, response framing)
//! - Polling settings (how often the meter is queried)
//! - Monitor settings (hot-plug polling and detach debounce)

use crate::error::{ConfigError, SettingsError, SettingsResult};
use phmetro_core::{ConnectionConfig, ResponseFraming};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// pH query understood by the meter: "P\r"
pub const DEFAULT_REQUEST: [u8; 2] = [80, 13];

/// Request/response settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeSettings {
    /// Bytes written for each reading
    pub request: Vec<u8>,
    /// How long to wait for a complete response
    pub timeout_ms: u64,
    /// When a response is complete
    pub framing: ResponseFraming,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            request: DEFAULT_REQUEST.to_vec(),
            timeout_ms: 1000,
            framing: ResponseFraming::default(),
        }
    }
}

impl ExchangeSettings {
    /// Response timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Reading poll settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSettings {
    /// Whether readings are polled at all
    pub enabled: bool,
    /// Time between queries
    pub interval_ms: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 1000,
        }
    }
}

impl PollingSettings {
    /// Time between queries
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Hot-plug monitor settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// How often the port list is scanned
    pub poll_interval_ms: u64,
    /// How long a device must stay gone before it counts as detached
    pub detach_settle_ms: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            detach_settle_ms: 2000,
        }
    }
}

impl MonitorSettings {
    /// Port list scan period
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Detach debounce
    pub fn detach_settle(&self) -> Duration {
        Duration::from_millis(self.detach_settle_ms)
    }
}

/// Supported file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    /// Pick the format from the file extension
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Self::Json),
            Some("toml") => Ok(Self::Toml),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Connection settings
    pub connection: ConnectionConfig,
    /// Exchange settings
    pub exchange: ExchangeSettings,
    /// Polling settings
    pub polling: PollingSettings,
    /// Monitor settings
    pub monitor: MonitorSettings,
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Default config file location: `<config dir>/phmetro/config.toml`
    pub fn default_path() -> SettingsResult<PathBuf> {
        let base = dirs::config_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| {
                ConfigError::UnsupportedPlatform("no config or home directory".to_string())
            })?;
        Ok(base.join("phmetro").join("config.toml"))
    }

    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let format = ConfigFormat::from_path(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| SettingsError::LoadError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let config: Self = match format {
            ConfigFormat::Json => serde_json::from_str(&content)?,
            ConfigFormat::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load configuration, falling back to defaults if the file is missing
    pub fn load_or_default(path: &Path) -> SettingsResult<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            tracing::info!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save configuration to file, creating the parent directory
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;
        let format = ConfigFormat::from_path(path)?;

        let content = match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self)?,
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                SettingsError::ConfigDirectory(format!("{}: {}", parent.display(), e))
            })?;
        }
        std::fs::write(path, content).map_err(|e| SettingsError::SaveError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        tracing::debug!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Validate every section
    pub fn validate(&self) -> SettingsResult<()> {
        self.connection
            .validate()
            .map_err(|e| SettingsError::invalid("connection", e.to_string()))?;

        if self.exchange.request.is_empty() {
            return Err(SettingsError::invalid(
                "exchange.request",
                "must not be empty",
            ));
        }
        if self.exchange.timeout_ms == 0 {
            return Err(SettingsError::invalid("exchange.timeout_ms", "must be > 0"));
        }
        self.exchange
            .framing
            .validate()
            .map_err(|e| SettingsError::invalid("exchange.framing", e.to_string()))?;

        if self.polling.interval_ms == 0 {
            return Err(SettingsError::invalid("polling.interval_ms", "must be > 0"));
        }
        if self.monitor.poll_interval_ms == 0 {
            return Err(SettingsError::invalid(
                "monitor.poll_interval_ms",
                "must be > 0",
            ));
        }

        Ok(())
    }
}
