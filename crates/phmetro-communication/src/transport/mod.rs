//! Transport abstraction
//!
//! A transport is the raw byte pipe to the device plus hot-plug
//! notifications. The session owns exactly one transport instance.
//!
//! Implementations:
//! - [`SerialTransport`]: USB serial adapters via the `serialport` crate
//! - [`VirtualTransport`]: in-memory device for tests and simulation

pub mod serial;
pub mod virtual_port;

pub use serial::{list_ports, MonitorConfig, SerialPortInfo, SerialTransport};
pub use virtual_port::VirtualTransport;

use phmetro_core::PortSettings;
use std::sync::Arc;

/// Result type for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Transport specific errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Transport error: {message}")]
pub struct TransportError {
    message: String,
}

impl TransportError {
    /// Create a new transport error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The error detail without the prefix
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Opaque handle to an open port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportHandle(u64);

impl TransportHandle {
    /// Wrap a transport-specific id
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// The transport-specific id
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TransportHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "port#{}", self.0)
    }
}

/// Callbacks from the transport into the session
///
/// Called from transport-owned threads (monitor, reader).
pub trait TransportListener: Send + Sync {
    /// A device appeared
    fn on_attach(&self);

    /// The device went away
    fn on_detach(&self);

    /// A chunk of bytes arrived on an open port
    fn on_data_received(&self, handle: TransportHandle, data: &[u8]);

    /// An open port stopped working; no more data will arrive on it
    fn on_port_error(&self, handle: TransportHandle, reason: &str);
}

/// Physical or virtual serial endpoint
///
/// Implementations must not invoke the listener from inside any of these
/// methods; the session calls them while holding its state lock.
pub trait Transport: Send + Sync {
    /// Human readable transport name
    fn name(&self) -> String;

    /// Check that the underlying driver layer is usable
    fn probe(&self) -> TransportResult<()> {
        Ok(())
    }

    /// Start delivering hot-plug and data callbacks to `listener`
    fn begin_monitoring(&self, listener: Arc<dyn TransportListener>) -> TransportResult<()>;

    /// Stop hot-plug callbacks and drop the listener
    fn end_monitoring(&self);

    /// Whether an eligible device is currently present
    fn is_device_present(&self) -> bool;

    /// Open the first eligible device with the given line parameters
    fn open(&self, settings: &PortSettings) -> TransportResult<TransportHandle>;

    /// Close an open port. Unknown handles are ignored.
    fn close(&self, handle: TransportHandle);

    /// Write all bytes to an open port
    fn write(&self, handle: TransportHandle, data: &[u8]) -> TransportResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::new("no such device");
        assert_eq!(err.to_string(), "Transport error: no such device");
        assert_eq!(err.message(), "no such device");
    }

    #[test]
    fn test_handle_display() {
        let handle = TransportHandle::new(3);
        assert_eq!(handle.id(), 3);
        assert_eq!(handle.to_string(), "port#3");
    }
}
