//! Replays random hot-plug and API sequences and checks the session against
//! the documented transition table.

use parking_lot::Mutex;
use phmetro_communication::{SerialSession, VirtualTransport};
use phmetro_core::{ConnectionConfig, ServiceState, SessionEvent};
use proptest::prelude::*;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
enum Op {
    Start,
    Stop,
    Plug,
    Unplug,
    Connect,
    Disconnect,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Start),
        Just(Op::Stop),
        Just(Op::Plug),
        Just(Op::Unplug),
        Just(Op::Connect),
        Just(Op::Disconnect),
    ]
}

/// Reference model of the transition table
#[derive(Debug)]
struct Model {
    auto_connect: bool,
    present: bool,
    state: ServiceState,
}

impl Model {
    fn attach(&mut self) {
        self.state = if self.auto_connect {
            ServiceState::Connected
        } else {
            ServiceState::DeviceAttached
        };
    }

    fn apply(&mut self, op: Op) {
        match op {
            Op::Start => {
                if self.state == ServiceState::Stopped {
                    self.state = ServiceState::Started;
                    if self.present {
                        self.attach();
                    }
                }
            }
            Op::Stop => self.state = ServiceState::Stopped,
            Op::Plug => {
                if !self.present {
                    self.present = true;
                    if self.state == ServiceState::Started {
                        self.attach();
                    }
                }
            }
            Op::Unplug => {
                if self.present {
                    self.present = false;
                    if self.state.has_device() {
                        self.state = ServiceState::Started;
                    }
                }
            }
            Op::Connect => {
                if !self.auto_connect && self.state == ServiceState::DeviceAttached {
                    self.state = ServiceState::Connected;
                }
            }
            Op::Disconnect => {
                if !self.auto_connect && self.state == ServiceState::Connected {
                    self.state = ServiceState::DeviceAttached;
                }
            }
        }
    }
}

fn target_state(event: &SessionEvent) -> Option<ServiceState> {
    match event {
        SessionEvent::ServiceStarted { .. } => Some(ServiceState::Started),
        SessionEvent::ServiceStopped => Some(ServiceState::Stopped),
        SessionEvent::DeviceAttached => Some(ServiceState::DeviceAttached),
        SessionEvent::DeviceDetached => Some(ServiceState::Started),
        SessionEvent::Connected { .. } => Some(ServiceState::Connected),
        SessionEvent::Disconnected => Some(ServiceState::DeviceAttached),
        SessionEvent::Error { .. } => None,
    }
}

proptest! {
    #[test]
    fn replay_matches_transition_table(
        auto_connect in any::<bool>(),
        present in any::<bool>(),
        ops in prop::collection::vec(op(), 0..40),
    ) {
        let transport = if present {
            VirtualTransport::with_device_present()
        } else {
            VirtualTransport::new()
        };
        let session = SerialSession::new(transport.clone()).unwrap();
        session
            .configure(ConnectionConfig::new().with_auto_connect(auto_connect))
            .unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        session.subscribe_all(move |event| {
            sink.lock().push(event.clone());
            Ok(())
        });

        let mut model = Model { auto_connect, present, state: ServiceState::Stopped };
        for op in ops {
            match op {
                Op::Start => { let _ = session.start(); }
                Op::Stop => session.stop(),
                Op::Plug => transport.plug(),
                Op::Unplug => transport.unplug(),
                Op::Connect => { let _ = session.connect(); }
                Op::Disconnect => { let _ = session.disconnect(); }
            }
            model.apply(op);
            prop_assert_eq!(session.state(), model.state);
            prop_assert_eq!(session.is_open(), model.state == ServiceState::Connected);
            prop_assert_eq!(transport.is_open(), model.state == ServiceState::Connected);
        }

        // Every published lifecycle event is one documented step
        let mut state = ServiceState::Stopped;
        for event in events.lock().iter() {
            if let Some(next) = target_state(event) {
                prop_assert!(
                    state.can_transition_to(next),
                    "undocumented transition {} -> {}", state, next
                );
                state = next;
            }
        }
        prop_assert_eq!(state, session.state());
    }
}
