//! # pH-meter Core
//!
//! Core types and utilities for the pH-meter serial session manager.
//! Provides the service state machine states, connection configuration,
//! the error taxonomy, and the per-session event bus.

pub mod data;
pub mod error;
pub mod event_bus;
pub mod types;

pub use data::{
    ConnectionConfig, PortSettings, ResponseFraming, SerialParity, ServiceState, MAX_RESPONSE_LEN,
};

pub use error::{Error, Result, SessionError};

pub use event_bus::{
    EventBus, EventBusConfig, EventFilter, EventKind, HandlerResult, SessionEvent, SubscriptionId,
};

pub use types::{thread_safe, ThreadSafe};
