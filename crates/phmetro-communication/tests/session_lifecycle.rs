//! Connection lifecycle scenarios against the virtual transport

use parking_lot::Mutex;
use phmetro_communication::{SerialSession, VirtualTransport};
use phmetro_core::{ConnectionConfig, EventKind, ServiceState, SessionError, SessionEvent};
use std::sync::Arc;

fn session_with(transport: &VirtualTransport, auto_connect: bool) -> SerialSession {
    let session = SerialSession::new(transport.clone()).expect("virtual transport is available");
    session
        .configure(
            ConnectionConfig::new()
                .with_auto_connect(auto_connect)
                .with_baud_rate(4800)
                .with_data_bits(8),
        )
        .expect("valid config");
    session
}

fn record(session: &SerialSession) -> Arc<Mutex<Vec<SessionEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    session.subscribe_all(move |event| {
        sink.lock().push(event.clone());
        Ok(())
    });
    seen
}

fn kinds(seen: &Mutex<Vec<SessionEvent>>) -> Vec<EventKind> {
    seen.lock().iter().map(SessionEvent::kind).collect()
}

#[test]
fn test_auto_connect_event_order() {
    let transport = VirtualTransport::with_device_present();
    let session = session_with(&transport, true);
    let seen = record(&session);

    session.start().unwrap();

    assert_eq!(
        kinds(&seen),
        vec![
            EventKind::ServiceStarted,
            EventKind::DeviceAttached,
            EventKind::Connected
        ]
    );
    assert_eq!(
        seen.lock()[0],
        SessionEvent::ServiceStarted {
            device_attached: true
        }
    );
    assert!(session.is_open());
    assert!(session.is_service_started());
    let settings = transport.open_settings().unwrap();
    assert_eq!(settings.baud_rate, 4800);
    assert_eq!(settings.data_bits, 8);
}

#[test]
fn test_hot_plug_auto_connect() {
    let transport = VirtualTransport::new();
    let session = session_with(&transport, true);
    let seen = record(&session);

    session.start().unwrap();
    assert_eq!(session.state(), ServiceState::Started);

    transport.plug();
    assert_eq!(session.state(), ServiceState::Connected);

    transport.unplug();
    assert_eq!(session.state(), ServiceState::Started);
    assert!(!session.is_open());

    assert_eq!(
        kinds(&seen),
        vec![
            EventKind::ServiceStarted,
            EventKind::DeviceAttached,
            EventKind::Connected,
            EventKind::DeviceDetached
        ]
    );
}

#[test]
fn test_start_twice_fails() {
    let transport = VirtualTransport::with_device_present();
    let session = session_with(&transport, false);
    let seen = record(&session);

    session.start().unwrap();
    let state = session.state();
    let events = seen.lock().len();

    assert_eq!(session.start(), Err(SessionError::AlreadyStarted));
    assert_eq!(session.state(), state);
    assert_eq!(seen.lock().len(), events);
}

#[test]
fn test_stop_twice_emits_one_event() {
    let transport = VirtualTransport::with_device_present();
    let session = session_with(&transport, true);
    session.start().unwrap();
    let seen = record(&session);

    session.stop();
    let after_first = session.state();
    session.stop();

    assert_eq!(after_first, ServiceState::Stopped);
    assert_eq!(session.state(), ServiceState::Stopped);
    assert_eq!(kinds(&seen), vec![EventKind::ServiceStopped]);
    assert!(!transport.is_open());
    assert!(!transport.is_monitoring());
}

#[test]
fn test_stop_before_start_is_silent() {
    let session = session_with(&VirtualTransport::new(), false);
    let seen = record(&session);
    session.stop();
    assert!(seen.lock().is_empty());
}

#[test]
fn test_manual_connect_and_disconnect() {
    let transport = VirtualTransport::new();
    let session = session_with(&transport, false);
    let seen = record(&session);

    session.start().unwrap();
    assert_eq!(session.connect(), Err(SessionError::NoDevice));

    transport.plug();
    assert_eq!(session.state(), ServiceState::DeviceAttached);
    assert!(!session.is_open());

    session.connect().unwrap();
    assert!(session.is_open());
    session.disconnect().unwrap();
    assert!(!session.is_open());
    assert_eq!(session.state(), ServiceState::DeviceAttached);

    assert_eq!(
        kinds(&seen),
        vec![
            EventKind::ServiceStarted,
            EventKind::DeviceAttached,
            EventKind::Connected,
            EventKind::Disconnected
        ]
    );
}

#[test]
fn test_open_failure_is_reported() {
    let transport = VirtualTransport::with_device_present();
    transport.fail_open(Some("device busy"));
    let session = session_with(&transport, false);
    let seen = record(&session);
    session.start().unwrap();

    let err = session.connect().unwrap_err();
    assert!(matches!(err, SessionError::OpenFailed { .. }));
    assert_eq!(session.state(), ServiceState::DeviceAttached);

    match seen.lock().last() {
        Some(SessionEvent::Error { message, .. }) => assert!(message.contains("device busy")),
        other => panic!("expected error event, got {:?}", other),
    };
}

#[test]
fn test_invalid_config_rejected() {
    let session = SerialSession::new(VirtualTransport::new()).unwrap();
    let err = session
        .configure(ConnectionConfig::new().with_baud_rate(0))
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidConfig { .. }));

    let err = session
        .configure(ConnectionConfig::new().with_data_bits(9))
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidConfig { .. }));
    assert_eq!(session.config(), ConnectionConfig::default());
}

#[test]
fn test_failing_handler_does_not_break_dispatch() {
    let transport = VirtualTransport::with_device_present();
    let session = session_with(&transport, true);

    session.subscribe(EventKind::DeviceAttached, |_| {
        anyhow::bail!("display not ready")
    });
    let seen = record(&session);
    session.start().unwrap();

    assert_eq!(
        kinds(&seen),
        vec![
            EventKind::ServiceStarted,
            EventKind::DeviceAttached,
            EventKind::Error,
            EventKind::Connected
        ]
    );
}

#[test]
fn test_unsubscribed_handler_is_not_called() {
    let transport = VirtualTransport::new();
    let session = session_with(&transport, false);
    let calls = Arc::new(Mutex::new(0));
    let counter = calls.clone();
    let id = session.subscribe(EventKind::DeviceAttached, move |_| {
        *counter.lock() += 1;
        Ok(())
    });

    session.start().unwrap();
    transport.plug();
    assert!(session.unsubscribe(id));
    transport.unplug();
    transport.plug();

    assert_eq!(*calls.lock(), 1);
}

#[test]
fn test_restart_after_stop() {
    let transport = VirtualTransport::with_device_present();
    let session = session_with(&transport, true);

    session.start().unwrap();
    session.stop();
    session.start().unwrap();

    assert_eq!(session.state(), ServiceState::Connected);
    assert_eq!(transport.open_count(), 2);
}
