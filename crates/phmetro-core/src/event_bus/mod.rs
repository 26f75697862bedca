//! # Event Bus Module
//!
//! Typed, per-instance event bus for session lifecycle and error
//! notifications.
//!
//! ## Overview
//!
//! - Publishers emit [`SessionEvent`]s without knowing subscribers
//! - Subscribers register per [`EventKind`] and are called in registration order
//! - A failing subscriber is reported on the `Error` kind instead of
//!   breaking dispatch
//! - Async consumers can take a broadcast receiver
//!
//! ## Usage
//!
//! ```rust,ignore
//! use phmetro_core::event_bus::{EventBus, EventKind, SessionEvent};
//!
//! let bus = EventBus::new();
//! let subscription = bus.subscribe(EventKind::DeviceAttached, |event| {
//!     println!("{}", event.description());
//!     Ok(())
//! });
//!
//! bus.publish(SessionEvent::DeviceAttached);
//! bus.unsubscribe(subscription);
//! ```

mod bus;
mod events;

pub use bus::*;
pub use events::*;
