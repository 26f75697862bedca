//! # phmetro
//!
//! A USB serial session manager for pH meters, with:
//! - Hot-plug detection of the meter's USB serial adapter
//! - Connection lifecycle with optional auto-connect
//! - Correlated request/response exchanges with explicit framing
//! - Per-session typed event bus
//!
//! ## Architecture
//!
//! phmetro is organized as a workspace with multiple crates:
//!
//! 1. **phmetro-core** - Data model, error taxonomy, event bus
//! 2. **phmetro-communication** - Transports, session, exchange, recurring task
//! 3. **phmetro-settings** - Configuration files
//! 4. **phmetro** - Reading decoding and the console poller binary

pub mod reading;

pub use reading::PhReading;

pub use phmetro_core::{
    ConnectionConfig, Error, EventBus, EventBusConfig, EventKind, PortSettings, ResponseFraming,
    Result, SerialParity, ServiceState, SessionError, SessionEvent, SubscriptionId,
};

pub use phmetro_communication::{
    list_ports, MonitorConfig, RecurringTask, SerialPortInfo, SerialSession, SerialTransport,
    SessionOptions, Transport, VirtualTransport,
};

pub use phmetro_settings::{
    Config, ExchangeSettings, MonitorSettings, PollingSettings, SettingsError,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging with the default configuration
///
/// Sets up structured logging with:
/// - Console output with pretty formatting
/// - RUST_LOG environment variable support
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_names(true)
        .with_line_number(true)
        .pretty();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

/// Hot-plug monitor timing from the settings file
pub fn monitor_config(settings: &MonitorSettings) -> MonitorConfig {
    MonitorConfig {
        poll_interval: settings.poll_interval(),
        detach_settle: settings.detach_settle(),
    }
}

/// Session options from the settings file
pub fn session_options(config: &Config) -> SessionOptions {
    SessionOptions::default().with_framing(config.exchange.framing)
}

/// Create a session over the transport `config` asks for and apply the
/// connection settings
pub fn open_session(
    config: &Config,
    simulate: bool,
) -> std::result::Result<SerialSession, SessionError> {
    let options = session_options(config);
    let session = if simulate {
        SerialSession::with_options(VirtualTransport::simulated_meter("7.00"), options)?
    } else {
        SerialSession::with_options(
            SerialTransport::with_config(monitor_config(&config.monitor)),
            options,
        )?
    };
    session.configure(config.connection.clone())?;
    Ok(session)
}

/// In manual mode, open the port whenever the meter is plugged in
///
/// A failed open is already published as an `Error` event, so it is only
/// logged here. The subscription holds a session handle until
/// [`SerialSession::shutdown`] or an unsubscribe drops it.
pub fn connect_on_attach(session: &SerialSession) -> SubscriptionId {
    let handle = session.clone();
    session.subscribe(EventKind::DeviceAttached, move |_| {
        if let Err(e) = handle.connect() {
            tracing::debug!("Connect after attach failed: {}", e);
        }
        Ok(())
    })
}

/// Query the meter once
pub async fn read_ph(
    session: &SerialSession,
    exchange: &ExchangeSettings,
) -> std::result::Result<PhReading, SessionError> {
    let response = session
        .exchange(&exchange.request, exchange.timeout())
        .await?;
    Ok(PhReading::parse(&response))
}
