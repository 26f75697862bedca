//! Connection controller
//!
//! Owns the service state, the open port handle, and the exchange
//! coordinator. Every method runs under the session's state lock; events
//! are queued in an outbox and published by the session once the lock is
//! released.

use super::exchange::{ExchangeCoordinator, ExchangeResult};
use crate::transport::{Transport, TransportHandle, TransportListener};
use phmetro_core::{
    ConnectionConfig, PortSettings, ResponseFraming, ServiceState, SessionError, SessionEvent,
};
use std::sync::Arc;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy)]
struct OpenConnection {
    handle: TransportHandle,
    settings: PortSettings,
}

/// Lifecycle state machine for one serial session
#[derive(Debug, Default)]
pub struct ConnectionController {
    state: ServiceState,
    config: ConnectionConfig,
    connection: Option<OpenConnection>,
    exchange: ExchangeCoordinator,
    events: Vec<SessionEvent>,
    /// Bumped on every stop; listeners from an earlier run are ignored
    run: u64,
}

/// Error event for an asynchronous failure
pub fn error_event(error: &SessionError) -> SessionEvent {
    let title = match error {
        SessionError::DeviceLost => "Device lost",
        SessionError::Timeout { .. } => "Timeout",
        SessionError::OpenFailed { .. } => "Connection failed",
        SessionError::WriteFailed { .. } => "Write failed",
        SessionError::PortFailed { .. } => "Port failed",
        SessionError::ResponseTooLong { .. } => "Response too long",
        SessionError::TransportUnavailable { .. } => "Service unavailable",
        _ => "Serial error",
    };
    SessionEvent::error(title, error.to_string())
}

impl ConnectionController {
    /// Create a stopped controller with the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn state(&self) -> ServiceState {
        self.state
    }

    /// Stored configuration
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Whether the serial port is open
    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    /// Line parameters of the open connection
    pub fn connection_settings(&self) -> Option<PortSettings> {
        self.connection.map(|conn| conn.settings)
    }

    /// Current run; changes each time the service stops
    pub fn run(&self) -> u64 {
        self.run
    }

    /// Whether an exchange is outstanding
    pub fn has_pending_exchange(&self) -> bool {
        self.exchange.is_busy()
    }

    /// Drain the queued events in transition order
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    fn emit(&mut self, event: SessionEvent) {
        self.events.push(event);
    }

    fn emit_error(&mut self, error: &SessionError) {
        tracing::warn!("{}", error);
        self.events.push(error_event(error));
    }

    fn transition(&mut self, target: ServiceState) {
        debug_assert!(
            self.state.can_transition_to(target),
            "undocumented transition {} -> {}",
            self.state,
            target
        );
        tracing::debug!("Service state {} -> {}", self.state, target);
        self.state = target;
    }

    /// Store a new configuration
    ///
    /// An open connection keeps the settings it was opened with.
    pub fn configure(&mut self, config: ConnectionConfig) -> Result<(), SessionError> {
        config.validate()?;
        tracing::info!(
            "Configured {} (auto-connect {})",
            config.port_settings(),
            config.auto_connect
        );
        self.config = config;
        Ok(())
    }

    /// Start monitoring for the device
    pub fn start(
        &mut self,
        transport: &dyn Transport,
        listener: Arc<dyn TransportListener>,
    ) -> Result<(), SessionError> {
        if self.state != ServiceState::Stopped {
            return Err(SessionError::AlreadyStarted);
        }

        if let Err(e) = transport.begin_monitoring(listener) {
            let error = SessionError::TransportUnavailable {
                reason: e.message().to_string(),
            };
            self.emit_error(&error);
            return Err(error);
        }

        self.transition(ServiceState::Started);
        let present = transport.is_device_present();
        tracing::info!("Service started on {} transport", transport.name());
        self.emit(SessionEvent::ServiceStarted {
            device_attached: present,
        });

        if present {
            self.attach(transport);
        }
        Ok(())
    }

    /// Stop the service. Safe to call in any state.
    pub fn stop(&mut self, transport: &dyn Transport) {
        if self.state == ServiceState::Stopped {
            return;
        }

        if let Some(conn) = self.connection.take() {
            transport.close(conn.handle);
        }
        self.exchange.cancel(SessionError::Cancelled);
        transport.end_monitoring();
        self.run = self.run.wrapping_add(1);

        self.transition(ServiceState::Stopped);
        tracing::info!("Service stopped");
        self.emit(SessionEvent::ServiceStopped);
    }

    /// Hot-plug attach
    pub fn on_device_attached(&mut self, transport: &dyn Transport) {
        if self.state != ServiceState::Started {
            tracing::debug!("Ignoring attach in state {}", self.state);
            return;
        }
        self.attach(transport);
    }

    fn attach(&mut self, transport: &dyn Transport) {
        self.transition(ServiceState::DeviceAttached);
        self.emit(SessionEvent::DeviceAttached);

        if self.config.auto_connect {
            // Failure is already reported as an error event
            let _ = self.open_port(transport);
        }
    }

    /// Hot-plug detach
    pub fn on_device_detached(&mut self, transport: &dyn Transport) {
        if !self.state.has_device() {
            tracing::debug!("Ignoring detach in state {}", self.state);
            return;
        }

        if let Some(conn) = self.connection.take() {
            transport.close(conn.handle);
        }
        self.transition(ServiceState::Started);
        self.emit(SessionEvent::DeviceDetached);

        if self.exchange.cancel(SessionError::DeviceLost).is_some() {
            self.emit_error(&SessionError::DeviceLost);
        }
    }

    /// Bytes from the transport
    pub fn on_data(&mut self, handle: TransportHandle, data: &[u8]) {
        match self.connection {
            Some(conn) if conn.handle == handle => {
                if let Err(error) = self.exchange.on_data(data) {
                    self.emit_error(&error);
                }
            }
            _ => tracing::trace!("Dropping {} bytes from {}", data.len(), handle),
        }
    }

    /// The transport lost an open port without a detach
    ///
    /// The connection is dropped and the state falls back to
    /// DeviceAttached; an outstanding request fails with `PortFailed`.
    pub fn on_port_error(
        &mut self,
        transport: &dyn Transport,
        handle: TransportHandle,
        reason: &str,
    ) {
        match self.connection {
            Some(conn) if conn.handle == handle => {}
            _ => {
                tracing::debug!("Ignoring failure of stale {}: {}", handle, reason);
                return;
            }
        }

        self.connection = None;
        transport.close(handle);
        let error = SessionError::PortFailed {
            reason: reason.to_string(),
        };
        self.exchange.cancel(error.clone());
        self.transition(ServiceState::DeviceAttached);
        self.emit(SessionEvent::Disconnected);
        self.emit_error(&error);
    }

    /// Reopen the port after a failed auto-connect
    ///
    /// Does nothing unless auto-connect is on and the device is attached
    /// without an open port.
    pub fn retry_auto_connect(&mut self, transport: &dyn Transport) {
        if self.config.auto_connect
            && self.state == ServiceState::DeviceAttached
            && self.connection.is_none()
        {
            tracing::debug!("Retrying auto-connect");
            // Failure is already reported as an error event
            let _ = self.open_port(transport);
        }
    }

    /// Open the port manually
    pub fn connect(&mut self, transport: &dyn Transport) -> Result<(), SessionError> {
        if self.config.auto_connect {
            return Err(SessionError::AutoConnectEnabled);
        }
        match self.state {
            ServiceState::Connected => Err(SessionError::AlreadyConnected),
            ServiceState::DeviceAttached => self.open_port(transport),
            _ => Err(SessionError::NoDevice),
        }
    }

    /// Close the port manually. No-op unless connected.
    pub fn disconnect(&mut self, transport: &dyn Transport) -> Result<(), SessionError> {
        if self.config.auto_connect {
            return Err(SessionError::AutoConnectEnabled);
        }
        let Some(conn) = self.connection.take() else {
            return Ok(());
        };

        transport.close(conn.handle);
        self.exchange.cancel(SessionError::Cancelled);
        self.transition(ServiceState::DeviceAttached);
        tracing::info!("Disconnected");
        self.emit(SessionEvent::Disconnected);
        Ok(())
    }

    fn open_port(&mut self, transport: &dyn Transport) -> Result<(), SessionError> {
        let settings = self.config.port_settings();
        match transport.open(&settings) {
            Ok(handle) => {
                self.connection = Some(OpenConnection { handle, settings });
                self.transition(ServiceState::Connected);
                tracing::info!("Connected at {}", settings);
                self.emit(SessionEvent::Connected { settings });
                Ok(())
            }
            Err(e) => {
                let error = SessionError::OpenFailed {
                    reason: e.message().to_string(),
                };
                self.emit_error(&error);
                Err(error)
            }
        }
    }

    /// Register and write a request
    pub fn begin_exchange(
        &mut self,
        transport: &dyn Transport,
        request: &[u8],
        framing: ResponseFraming,
    ) -> Result<(u64, oneshot::Receiver<ExchangeResult>), SessionError> {
        self.retry_auto_connect(transport);
        let conn = match (self.state, self.connection) {
            (ServiceState::Connected, Some(conn)) => conn,
            _ => return Err(SessionError::NotConnected),
        };

        let (id, rx) = self.exchange.begin(request, framing)?;
        if let Err(e) = transport.write(conn.handle, request) {
            self.exchange.abandon(id);
            let error = SessionError::WriteFailed {
                reason: e.message().to_string(),
            };
            self.emit_error(&error);
            return Err(error);
        }
        Ok((id, rx))
    }

    /// Time out request `id` if it is still outstanding
    pub fn expire(&mut self, id: u64, timeout_ms: u64) -> bool {
        let error = SessionError::Timeout { timeout_ms };
        let expired = self.exchange.fail(id, error.clone());
        if expired {
            self.emit_error(&error);
        }
        expired
    }

    /// Forget request `id`; its caller stopped waiting
    pub fn abandon(&mut self, id: u64) {
        self.exchange.abandon(id);
    }
}
