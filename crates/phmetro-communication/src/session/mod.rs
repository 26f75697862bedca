//! Serial session
//!
//! [`SerialSession`] ties one transport, one connection controller, and one
//! event bus together. All state changes go through a single mutex; events
//! produced by a change are published after that mutex is released, in the
//! order the changes happened. Handlers may call back into the session.

pub mod controller;
pub mod exchange;

pub use controller::{error_event, ConnectionController};
pub use exchange::{ExchangeCoordinator, ExchangeResult, PendingRequest};

use crate::transport::{Transport, TransportHandle, TransportListener};
use parking_lot::{Mutex, ReentrantMutex};
use phmetro_core::{
    ConnectionConfig, EventBus, EventBusConfig, EventKind, HandlerResult, ResponseFraming,
    ServiceState, SessionError, SessionEvent, SubscriptionId,
};
use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;

/// Session construction options
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Framing used by [`SerialSession::exchange`]
    pub framing: ResponseFraming,
    /// Event bus settings
    pub event_bus: EventBusConfig,
}

impl SessionOptions {
    /// Set the default response framing
    pub fn with_framing(mut self, framing: ResponseFraming) -> Self {
        self.framing = framing;
        self
    }

    /// Set the event bus configuration
    pub fn with_event_bus(mut self, config: EventBusConfig) -> Self {
        self.event_bus = config;
        self
    }
}

struct SessionInner {
    transport: Arc<dyn Transport>,
    bus: EventBus,
    controller: Mutex<ConnectionController>,
    /// Held while publishing; the flag marks an active drain on this thread
    dispatch: ReentrantMutex<Cell<bool>>,
    outbox: Mutex<VecDeque<SessionEvent>>,
    options: SessionOptions,
}

impl SessionInner {
    /// Run `f` under the state lock, then publish what it produced
    fn with_controller<R>(
        &self,
        f: impl FnOnce(&mut ConnectionController, &dyn Transport) -> R,
    ) -> R {
        let dispatching = self.dispatch.lock();
        let result = {
            let mut controller = self.controller.lock();
            let result = f(&mut controller, self.transport.as_ref());
            self.outbox.lock().extend(controller.take_events());
            result
        };

        // A handler calling back in only queues; the outer drain delivers
        if !dispatching.replace(true) {
            loop {
                let next = self.outbox.lock().pop_front();
                match next {
                    Some(event) => {
                        self.bus.publish(event);
                    }
                    None => break,
                }
            }
            dispatching.set(false);
        }
        result
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let controller = self.controller.get_mut();
        controller.stop(self.transport.as_ref());
        controller.take_events();
    }
}

/// Routes transport callbacks into the session
///
/// Bound to the run it was started in; callbacks that arrive after that
/// run stopped are dropped.
struct SessionListener {
    inner: Weak<SessionInner>,
    run: u64,
}

impl SessionListener {
    fn route(&self, f: impl FnOnce(&mut ConnectionController, &dyn Transport)) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        inner.with_controller(|c, t| {
            if c.run() == self.run {
                f(c, t);
            } else {
                tracing::debug!("Dropping transport callback from stopped run {}", self.run);
            }
        });
    }
}

impl TransportListener for SessionListener {
    fn on_attach(&self) {
        self.route(|c, t| c.on_device_attached(t));
    }

    fn on_detach(&self) {
        self.route(|c, t| c.on_device_detached(t));
    }

    fn on_data_received(&self, handle: TransportHandle, data: &[u8]) {
        self.route(|c, _| c.on_data(handle, data));
    }

    fn on_port_error(&self, handle: TransportHandle, reason: &str) {
        self.route(|c, t| c.on_port_error(t, handle, reason));
    }
}

/// Clears an outstanding exchange if its future is dropped before resolving
struct PendingGuard<'a> {
    inner: &'a SessionInner,
    id: u64,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let id = self.id;
            self.inner.with_controller(|c, _| c.abandon(id));
        }
    }
}

/// Session manager for one serial device
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct SerialSession {
    inner: Arc<SessionInner>,
}

impl SerialSession {
    /// Create a session over `transport` with default options
    ///
    /// Fails with `TransportUnavailable` if the transport's driver layer
    /// cannot be used.
    pub fn new<T: Transport + 'static>(transport: T) -> Result<Self, SessionError> {
        Self::with_options(transport, SessionOptions::default())
    }

    /// Create a session with custom options
    pub fn with_options<T: Transport + 'static>(
        transport: T,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        Self::from_shared(Arc::new(transport), options)
    }

    /// Create a session over an already shared transport
    pub fn from_shared(
        transport: Arc<dyn Transport>,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        options.framing.validate()?;
        transport.probe().map_err(|e| {
            tracing::error!("{} transport unavailable: {}", transport.name(), e);
            SessionError::TransportUnavailable {
                reason: e.message().to_string(),
            }
        })?;

        Ok(Self {
            inner: Arc::new(SessionInner {
                transport,
                bus: EventBus::with_config(options.event_bus.clone()),
                controller: Mutex::new(ConnectionController::new()),
                dispatch: ReentrantMutex::new(Cell::new(false)),
                outbox: Mutex::new(VecDeque::new()),
                options,
            }),
        })
    }

    /// Store the connection configuration
    ///
    /// With auto-connect on and a device attached but not open, the port
    /// is opened with the new settings.
    pub fn configure(&self, config: ConnectionConfig) -> Result<(), SessionError> {
        self.inner.with_controller(|c, t| {
            c.configure(config)?;
            c.retry_auto_connect(t);
            Ok(())
        })
    }

    /// Start monitoring for the device
    pub fn start(&self) -> Result<(), SessionError> {
        let inner = Arc::downgrade(&self.inner);
        self.inner.with_controller(|c, t| {
            let listener: Arc<dyn TransportListener> = Arc::new(SessionListener {
                inner,
                run: c.run(),
            });
            c.start(t, listener)
        })
    }

    /// Stop the service; subscriptions stay registered
    pub fn stop(&self) {
        self.inner.with_controller(|c, t| c.stop(t));
    }

    /// Stop the service and drop every subscription
    pub fn shutdown(&self) {
        self.stop();
        self.inner.bus.unsubscribe_all();
    }

    /// Open the port manually (auto-connect off)
    pub fn connect(&self) -> Result<(), SessionError> {
        self.inner.with_controller(|c, t| c.connect(t))
    }

    /// Close the port manually (auto-connect off)
    pub fn disconnect(&self) -> Result<(), SessionError> {
        self.inner.with_controller(|c, t| c.disconnect(t))
    }

    /// Whether the serial port is open
    pub fn is_open(&self) -> bool {
        self.inner.controller.lock().is_open()
    }

    /// Whether the service is running
    pub fn is_service_started(&self) -> bool {
        self.inner.controller.lock().state().is_started()
    }

    /// Current service state
    pub fn state(&self) -> ServiceState {
        self.inner.controller.lock().state()
    }

    /// Stored connection configuration
    pub fn config(&self) -> ConnectionConfig {
        self.inner.controller.lock().config().clone()
    }

    /// Whether an exchange is outstanding
    pub fn has_pending_exchange(&self) -> bool {
        self.inner.controller.lock().has_pending_exchange()
    }

    /// Name of the underlying transport
    pub fn transport_name(&self) -> String {
        self.inner.transport.name()
    }

    /// Write `request` and wait for the response using the default framing
    pub async fn exchange(
        &self,
        request: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>, SessionError> {
        self.exchange_with(request, timeout, self.inner.options.framing)
            .await
    }

    /// Write `request` and wait for a response complete under `framing`
    ///
    /// Fails immediately with `NotConnected` or `Busy`. A second exchange
    /// is never queued behind the first.
    pub async fn exchange_with(
        &self,
        request: &[u8],
        timeout: Duration,
        framing: ResponseFraming,
    ) -> Result<Vec<u8>, SessionError> {
        let inner = self.inner.as_ref();
        let (id, mut rx) = inner.with_controller(|c, t| c.begin_exchange(t, request, framing))?;
        let mut guard = PendingGuard {
            inner,
            id,
            armed: true,
        };

        let outcome = match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SessionError::Cancelled),
            Err(_) => {
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                if inner.with_controller(|c, _| c.expire(id, timeout_ms)) {
                    Err(SessionError::Timeout { timeout_ms })
                } else {
                    // Resolved between the deadline and the expiry
                    rx.try_recv().unwrap_or(Err(SessionError::Cancelled))
                }
            }
        };
        guard.armed = false;
        outcome
    }

    /// Subscribe a handler to one event kind
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(kind, handler)
    }

    /// Subscribe a handler to every event
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner.bus.subscribe_all(handler)
    }

    /// Remove one subscription
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.bus.unsubscribe(id)
    }

    /// Async event stream
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.bus.receiver()
    }

    /// The session's event bus
    pub fn event_bus(&self) -> &EventBus {
        &self.inner.bus
    }
}

impl std::fmt::Debug for SerialSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialSession")
            .field("transport", &self.inner.transport.name())
            .field("state", &self.state())
            .finish()
    }
}
