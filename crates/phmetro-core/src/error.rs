//! Error handling for the pH-meter session manager
//!
//! Provides the error taxonomy shared by every layer:
//! - Session errors (configuration, lifecycle preconditions, exchange outcomes)
//! - Transport errors surfaced through the session (open/write failures)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Session error type
///
/// Precondition errors (`InvalidConfig`, `AlreadyStarted`, `NoDevice`,
/// `NotConnected`, `Busy`) are returned synchronously to the caller.
/// Asynchronous failures (`DeviceLost`, `Timeout`, `OpenFailed`,
/// `WriteFailed`, `PortFailed`, `ResponseTooLong`) resolve the outstanding
/// operation and are also published on the event bus.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Connection configuration rejected
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Why the configuration was rejected.
        reason: String,
    },

    /// `start` called while the service is not stopped
    #[error("Service already started")]
    AlreadyStarted,

    /// No device is attached
    #[error("No device attached")]
    NoDevice,

    /// The serial port is not connected
    #[error("Serial port not connected")]
    NotConnected,

    /// Another exchange is already in flight
    #[error("An exchange is already in flight")]
    Busy,

    /// No complete response arrived in time
    #[error("No response after {timeout_ms}ms")]
    Timeout {
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// The device was detached while the operation was outstanding
    #[error("Device lost")]
    DeviceLost,

    /// The operation was cancelled by a stop or disconnect
    #[error("Operation cancelled")]
    Cancelled,

    /// The transport could not open the device
    #[error("Failed to open serial port: {reason}")]
    OpenFailed {
        /// The reason the port failed to open.
        reason: String,
    },

    /// The transport rejected a write
    #[error("Failed to write to serial port: {reason}")]
    WriteFailed {
        /// The reason the write failed.
        reason: String,
    },

    /// The open port stopped working (read failure)
    #[error("Serial port failed: {reason}")]
    PortFailed {
        /// The reason reported by the transport.
        reason: String,
    },

    /// The device sent more than a response may hold without completing it
    #[error("Response exceeded {limit} bytes without completing")]
    ResponseTooLong {
        /// The byte limit that was exceeded.
        limit: usize,
    },

    /// The native transport layer cannot be located or used
    #[error("Transport unavailable: {reason}")]
    TransportUnavailable {
        /// Why the transport is unavailable.
        reason: String,
    },

    /// Manual connect/disconnect attempted while auto-connect is enabled
    #[error("Manual connection control is disabled while auto-connect is enabled")]
    AutoConnectEnabled,

    /// `connect` called while already connected
    #[error("Serial port already connected")]
    AlreadyConnected,
}

impl SessionError {
    /// Create an invalid-config error
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        SessionError::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Busy and timeouts can be retried as-is
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Busy | SessionError::Timeout { .. })
    }

    /// The caller should wait for a `DeviceAttached`/`Connected` event before retrying
    pub fn requires_reconnect(&self) -> bool {
        matches!(
            self,
            SessionError::NotConnected | SessionError::DeviceLost | SessionError::PortFailed { .. }
        )
    }

    /// Failures that resolve asynchronously and are also published as `Error` events
    pub fn is_asynchronous(&self) -> bool {
        matches!(
            self,
            SessionError::DeviceLost
                | SessionError::Timeout { .. }
                | SessionError::OpenFailed { .. }
                | SessionError::WriteFailed { .. }
                | SessionError::PortFailed { .. }
                | SessionError::ResponseTooLong { .. }
        )
    }
}

/// Main error type
///
/// A unified error type used in public APIs across the workspace.
#[derive(Error, Debug)]
pub enum Error {
    /// Session error
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Get the session error, if this is one
    pub fn as_session(&self) -> Option<&SessionError> {
        match self {
            Error::Session(e) => Some(e),
            _ => None,
        }
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Session(SessionError::Timeout { .. }))
    }

    /// Check if the failed operation can simply be retried
    pub fn is_retryable(&self) -> bool {
        self.as_session().is_some_and(SessionError::is_retryable)
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;
