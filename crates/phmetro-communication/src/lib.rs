//! # pH-meter Communication
//!
//! Serial transport and session management for the pH meter.
//! Provides hot-plug monitoring over USB serial, the connection lifecycle,
//! correlated request/response exchanges, and a recurring task used to poll
//! the meter.

pub mod scheduler;
pub mod session;
pub mod transport;

pub use scheduler::RecurringTask;

pub use session::{
    ConnectionController, ExchangeCoordinator, ExchangeResult, PendingRequest, SerialSession,
    SessionOptions,
};

pub use transport::{
    list_ports, MonitorConfig, SerialPortInfo, SerialTransport, Transport, TransportError,
    TransportHandle, TransportListener, TransportResult, VirtualTransport,
};
