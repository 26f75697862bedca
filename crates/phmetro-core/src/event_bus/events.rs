//! Event type definitions for the event bus.
//!
//! Lifecycle and error notifications published by a serial session.
//! Events are cloneable and serializable so they can be forwarded or logged.

use serde::{Deserialize, Serialize};

use crate::data::PortSettings;

/// Session event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionEvent {
    /// The service started monitoring for devices.
    ServiceStarted {
        /// Whether a device was already present at start.
        device_attached: bool,
    },
    /// The service stopped.
    ServiceStopped,
    /// A device was attached.
    DeviceAttached,
    /// The attached device went away.
    DeviceDetached,
    /// The serial port was opened.
    Connected {
        /// Line parameters the port was opened with.
        settings: PortSettings,
    },
    /// The serial port was closed by an explicit disconnect.
    Disconnected,
    /// A failure observers should know about.
    Error {
        /// Short title of the failing operation.
        title: String,
        /// Error detail.
        message: String,
    },
}

impl SessionEvent {
    /// Create an error event
    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        SessionEvent::Error {
            title: title.into(),
            message: message.into(),
        }
    }

    /// Get the kind of this event
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::ServiceStarted { .. } => EventKind::ServiceStarted,
            SessionEvent::ServiceStopped => EventKind::ServiceStopped,
            SessionEvent::DeviceAttached => EventKind::DeviceAttached,
            SessionEvent::DeviceDetached => EventKind::DeviceDetached,
            SessionEvent::Connected { .. } => EventKind::Connected,
            SessionEvent::Disconnected => EventKind::Disconnected,
            SessionEvent::Error { .. } => EventKind::Error,
        }
    }

    /// Get a short description of this event for logging
    pub fn description(&self) -> String {
        match self {
            SessionEvent::ServiceStarted { device_attached } => format!(
                "Service started ({})",
                if *device_attached {
                    "device present"
                } else {
                    "no device"
                }
            ),
            SessionEvent::ServiceStopped => "Service stopped".to_string(),
            SessionEvent::DeviceAttached => "Device attached".to_string(),
            SessionEvent::DeviceDetached => "Device detached".to_string(),
            SessionEvent::Connected { settings } => format!("Connected ({})", settings),
            SessionEvent::Disconnected => "Disconnected".to_string(),
            SessionEvent::Error { title, message } => format!("{}: {}", title, message),
        }
    }
}

/// Event kind used to key subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Service started.
    ServiceStarted,
    /// Service stopped.
    ServiceStopped,
    /// Device attached.
    DeviceAttached,
    /// Device detached.
    DeviceDetached,
    /// Port opened.
    Connected,
    /// Port closed by request.
    Disconnected,
    /// Error notifications.
    Error,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::ServiceStarted => write!(f, "ServiceStarted"),
            EventKind::ServiceStopped => write!(f, "ServiceStopped"),
            EventKind::DeviceAttached => write!(f, "DeviceAttached"),
            EventKind::DeviceDetached => write!(f, "DeviceDetached"),
            EventKind::Connected => write!(f, "Connected"),
            EventKind::Disconnected => write!(f, "Disconnected"),
            EventKind::Error => write!(f, "Error"),
        }
    }
}
