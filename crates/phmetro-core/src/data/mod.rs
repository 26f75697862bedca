//! Data models for the serial session
//!
//! This module provides:
//! - The service lifecycle state machine states
//! - Serial line parameters (parity, data bits, stop bits)
//! - Connection configuration and its validation
//! - Response framing for request/response exchanges

pub mod connection;
pub mod framing;

pub use connection::{ConnectionConfig, PortSettings, SerialParity};
pub use framing::{ResponseFraming, MAX_RESPONSE_LEN};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Service lifecycle state
///
/// Exactly one instance exists per session, owned by the connection
/// controller. `Stopped` is both the initial state and re-enterable; there
/// is no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ServiceState {
    /// Service not running, no hot-plug monitoring
    #[default]
    Stopped,
    /// Monitoring for devices, none attached
    Started,
    /// A device is attached but no port is open
    DeviceAttached,
    /// The serial port is open and exchanges are allowed
    Connected,
}

impl ServiceState {
    /// Check if the service is running (any state but `Stopped`)
    pub fn is_started(&self) -> bool {
        !matches!(self, ServiceState::Stopped)
    }

    /// Check if the serial port is open
    pub fn is_connected(&self) -> bool {
        matches!(self, ServiceState::Connected)
    }

    /// Check if a device is attached (connected or not)
    pub fn has_device(&self) -> bool {
        matches!(self, ServiceState::DeviceAttached | ServiceState::Connected)
    }

    /// Check if a transition from this state to `target` is documented.
    ///
    /// - Stopped → Started (start)
    /// - Started → DeviceAttached (attach)
    /// - DeviceAttached → Connected (connect)
    /// - Connected → DeviceAttached (disconnect)
    /// - DeviceAttached/Connected → Started (detach)
    /// - any → Stopped (stop)
    pub fn can_transition_to(&self, target: ServiceState) -> bool {
        use ServiceState::*;
        matches!(
            (self, target),
            (_, Stopped)
                | (Stopped, Started)
                | (Started, DeviceAttached)
                | (DeviceAttached, Connected)
                | (Connected, DeviceAttached)
                | (DeviceAttached | Connected, Started)
        )
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "Stopped"),
            Self::Started => write!(f, "Started"),
            Self::DeviceAttached => write!(f, "Device Attached"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}
