//! Connection configuration
//!
//! `ConnectionConfig` is stored by the controller before the service starts.
//! A connection snapshots it into [`PortSettings`] when the port opens, so
//! changes made while connected only apply to the next (re)connect.

use crate::error::SessionError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default baud rate of the pH meter
pub const DEFAULT_BAUD_RATE: u32 = 4800;

/// Default number of data bits
pub const DEFAULT_DATA_BITS: u8 = 8;

/// Default number of stop bits
pub const DEFAULT_STOP_BITS: u8 = 1;

/// Serial parity setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    /// No parity bit
    #[default]
    None,
    /// Even parity
    Even,
    /// Odd parity
    Odd,
}

impl fmt::Display for SerialParity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Even => write!(f, "even"),
            Self::Odd => write!(f, "odd"),
        }
    }
}

/// Line parameters handed to the transport when a port is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSettings {
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5-8)
    pub data_bits: u8,
    /// Stop bits (1 or 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
}

impl fmt::Display for PortSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} baud {}{}{}",
            self.baud_rate,
            self.data_bits,
            match self.parity {
                SerialParity::None => 'N',
                SerialParity::Even => 'E',
                SerialParity::Odd => 'O',
            },
            self.stop_bits
        )
    }
}

/// Connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Connect automatically when a device is attached
    pub auto_connect: bool,
    /// Baud rate for the serial link
    pub baud_rate: u32,
    /// Data bits, one of 5, 6, 7, 8
    pub data_bits: u8,
    /// Stop bits, 1 or 2
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    /// Parity
    #[serde(default)]
    pub parity: SerialParity,
}

fn default_stop_bits() -> u8 {
    DEFAULT_STOP_BITS
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            auto_connect: false,
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DEFAULT_DATA_BITS,
            stop_bits: DEFAULT_STOP_BITS,
            parity: SerialParity::None,
        }
    }
}

impl ConnectionConfig {
    /// Create a config with default line settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable auto-connect
    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    /// Set baud rate
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set data bits
    pub fn with_data_bits(mut self, data_bits: u8) -> Self {
        self.data_bits = data_bits;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.baud_rate == 0 {
            return Err(SessionError::invalid_config("baud rate must be > 0"));
        }

        if !(5..=8).contains(&self.data_bits) {
            return Err(SessionError::invalid_config(format!(
                "data bits must be 5, 6, 7 or 8 (got {})",
                self.data_bits
            )));
        }

        if !matches!(self.stop_bits, 1 | 2) {
            return Err(SessionError::invalid_config(format!(
                "stop bits must be 1 or 2 (got {})",
                self.stop_bits
            )));
        }

        Ok(())
    }

    /// Line parameters for opening the port
    pub fn port_settings(&self) -> PortSettings {
        PortSettings {
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            stop_bits: self.stop_bits,
            parity: self.parity,
        }
    }
}
