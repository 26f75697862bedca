//! pH-meter Settings Crate
//!
//! Handles application configuration: loading, validation, and saving of
//! the connection, exchange, polling, and hot-plug monitor settings.

pub mod config;
pub mod error;

pub use config::{Config, ConfigFormat, ExchangeSettings, MonitorSettings, PollingSettings};
pub use error::{ConfigError, SettingsError, SettingsResult};
