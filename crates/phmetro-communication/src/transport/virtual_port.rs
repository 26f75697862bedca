//! In-memory serial device
//!
//! Used by the test suites and by the `--simulate` mode of the binary.
//! Hot-plug and injected data are delivered synchronously on the calling
//! thread; responder output is delivered on a short-lived thread so that
//! `write` never calls back into the listener.

use super::{Transport, TransportError, TransportHandle, TransportListener, TransportResult};
use phmetro_core::{thread_safe, PortSettings, ThreadSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Produces the device's reply to a written request, if any
pub type Responder = Arc<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;

#[derive(Default)]
struct VirtualState {
    available: bool,
    present: bool,
    listener: Option<Arc<dyn TransportListener>>,
    open: Option<TransportHandle>,
    open_settings: Option<PortSettings>,
    open_count: usize,
    next_handle: u64,
    writes: Vec<Vec<u8>>,
    open_error: Option<String>,
    write_error: Option<String>,
    responder: Option<Responder>,
    response_delay: Duration,
}

/// Virtual pH meter transport
///
/// Clones share the same device.
#[derive(Clone)]
pub struct VirtualTransport {
    state: ThreadSafe<VirtualState>,
}

impl VirtualTransport {
    /// A driver layer with no device plugged in
    pub fn new() -> Self {
        Self {
            state: thread_safe(VirtualState {
                available: true,
                ..VirtualState::default()
            }),
        }
    }

    /// A driver layer with a device already plugged in
    pub fn with_device_present() -> Self {
        let transport = Self::new();
        transport.state.lock().present = true;
        transport
    }

    /// A driver layer that fails its capability probe
    pub fn unavailable() -> Self {
        let transport = Self::new();
        transport.state.lock().available = false;
        transport
    }

    /// A plugged-in meter that answers "P\r" with a fixed reading
    pub fn simulated_meter(reading: &str) -> Self {
        let transport = Self::with_device_present();
        let reply = format!("{}\r", reading).into_bytes();
        transport.set_responder(move |request| (request == b"P\r").then(|| reply.clone()));
        transport
    }

    /// Plug the device in
    pub fn plug(&self) {
        let listener = {
            let mut state = self.state.lock();
            if state.present {
                return;
            }
            state.present = true;
            state.listener.clone()
        };
        tracing::debug!("Virtual device plugged");
        if let Some(listener) = listener {
            listener.on_attach();
        }
    }

    /// Pull the device out; any open port dies with it
    pub fn unplug(&self) {
        let listener = {
            let mut state = self.state.lock();
            if !state.present {
                return;
            }
            state.present = false;
            state.open = None;
            state.listener.clone()
        };
        tracing::debug!("Virtual device unplugged");
        if let Some(listener) = listener {
            listener.on_detach();
        }
    }

    /// Deliver bytes from the device as one received chunk
    ///
    /// Dropped if no port is open.
    pub fn respond(&self, data: &[u8]) {
        let target = {
            let state = self.state.lock();
            state.open.zip(state.listener.clone())
        };
        match target {
            Some((handle, listener)) => listener.on_data_received(handle, data),
            None => tracing::trace!("Virtual device not open, dropping {} bytes", data.len()),
        }
    }

    /// Break the open port while the device stays plugged in
    ///
    /// The port is dropped and the listener told, as a real transport does
    /// when a read fails. No-op if no port is open.
    pub fn fail_port(&self, reason: &str) {
        let target = {
            let mut state = self.state.lock();
            let target = state.open.zip(state.listener.clone());
            state.open = None;
            target
        };
        if let Some((handle, listener)) = target {
            tracing::debug!("Virtual {} failed: {}", handle, reason);
            listener.on_port_error(handle, reason);
        }
    }

    /// Answer every write with the responder's output
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        self.state.lock().responder = Some(Arc::new(responder));
    }

    /// Stop answering writes
    pub fn clear_responder(&self) {
        self.state.lock().responder = None;
    }

    /// Delay before responder output is delivered
    pub fn set_response_delay(&self, delay: Duration) {
        self.state.lock().response_delay = delay;
    }

    /// Make subsequent `open` calls fail (or succeed again with `None`)
    pub fn fail_open(&self, reason: Option<&str>) {
        self.state.lock().open_error = reason.map(str::to_string);
    }

    /// Make subsequent `write` calls fail (or succeed again with `None`)
    pub fn fail_write(&self, reason: Option<&str>) {
        self.state.lock().write_error = reason.map(str::to_string);
    }

    /// Every successful write, in order
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().writes.clone()
    }

    /// Line parameters of the most recent open
    pub fn open_settings(&self) -> Option<PortSettings> {
        self.state.lock().open_settings
    }

    /// Number of successful opens
    pub fn open_count(&self) -> usize {
        self.state.lock().open_count
    }

    /// Whether a port is currently open
    pub fn is_open(&self) -> bool {
        self.state.lock().open.is_some()
    }

    /// Whether a listener is registered
    pub fn is_monitoring(&self) -> bool {
        self.state.lock().listener.is_some()
    }
}

impl Default for VirtualTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for VirtualTransport {
    fn name(&self) -> String {
        "virtual".to_string()
    }

    fn probe(&self) -> TransportResult<()> {
        if self.state.lock().available {
            Ok(())
        } else {
            Err(TransportError::new("Virtual driver layer not available"))
        }
    }

    fn begin_monitoring(&self, listener: Arc<dyn TransportListener>) -> TransportResult<()> {
        self.state.lock().listener = Some(listener);
        Ok(())
    }

    fn end_monitoring(&self) {
        self.state.lock().listener = None;
    }

    fn is_device_present(&self) -> bool {
        self.state.lock().present
    }

    fn open(&self, settings: &PortSettings) -> TransportResult<TransportHandle> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.open_error {
            return Err(TransportError::new(reason.clone()));
        }
        if !state.present {
            return Err(TransportError::new("No eligible serial device"));
        }
        state.next_handle += 1;
        let handle = TransportHandle::new(state.next_handle);
        state.open = Some(handle);
        state.open_settings = Some(*settings);
        state.open_count += 1;
        Ok(handle)
    }

    fn close(&self, handle: TransportHandle) {
        let mut state = self.state.lock();
        if state.open == Some(handle) {
            state.open = None;
        }
    }

    fn write(&self, handle: TransportHandle, data: &[u8]) -> TransportResult<()> {
        let mut state = self.state.lock();
        if state.open != Some(handle) {
            return Err(TransportError::new(format!("{} is not open", handle)));
        }
        if let Some(reason) = &state.write_error {
            return Err(TransportError::new(reason.clone()));
        }
        state.writes.push(data.to_vec());

        let reply = state.responder.as_ref().and_then(|responder| responder(data));
        if let (Some(reply), Some(listener)) = (reply, state.listener.clone()) {
            let delay = state.response_delay;
            thread::spawn(move || {
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                listener.on_data_received(handle, &reply);
            });
        }
        Ok(())
    }
}
