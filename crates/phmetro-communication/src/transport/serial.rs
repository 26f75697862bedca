//! USB serial transport
//!
//! Presence is detected by polling the system port list on a background
//! monitor thread. An open port gets its own reader thread that forwards
//! every chunk to the listener.

use super::{Transport, TransportError, TransportHandle, TransportListener, TransportResult};
use parking_lot::Mutex;
use phmetro_core::{PortSettings, SerialParity};
use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Linux Foundation vendor id, used by virtual root hubs
const ROOT_HUB_VID: u16 = 0x1d6b;

/// Size of a single read from the port
const READ_CHUNK: usize = 64;

/// Read timeout; bounds how long a closed port's reader lingers
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Hot-plug monitor timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    /// How often the port list is polled
    pub poll_interval: Duration,
    /// How long a device must stay gone before a detach is reported
    pub detach_settle: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            detach_settle: Duration::from_secs(2),
        }
    }
}

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,

    /// Port description (e.g., "USB FTDI FT232R")
    pub description: String,

    /// Manufacturer name if available
    pub manufacturer: Option<String>,

    /// USB vendor ID if applicable
    pub vid: Option<u16>,

    /// USB product ID if applicable
    pub pid: Option<u16>,
}

impl SerialPortInfo {
    /// Create a new port info
    pub fn new(port_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            description: description.into(),
            manufacturer: None,
            vid: None,
            pid: None,
        }
    }

    /// Set manufacturer
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    /// Set USB IDs
    pub fn with_usb_ids(mut self, vid: u16, pid: u16) -> Self {
        self.vid = Some(vid);
        self.pid = Some(pid);
        self
    }

    /// Whether this is a USB port
    pub fn is_usb(&self) -> bool {
        self.vid.is_some()
    }

    /// Linux virtual root hubs (1.1, 2.0, 3.0)
    pub fn is_root_hub(&self) -> bool {
        self.vid == Some(ROOT_HUB_VID) && matches!(self.pid, Some(1..=3))
    }

    /// Whether the session may open this port
    pub fn is_eligible(&self) -> bool {
        self.is_usb() && !self.is_root_hub()
    }
}

/// List serial ports that could be the meter
///
/// Only USB ports are returned; root hubs are skipped.
pub fn list_ports() -> TransportResult<Vec<SerialPortInfo>> {
    let ports = serialport::available_ports().map_err(|e| {
        tracing::error!("Failed to enumerate serial ports: {}", e);
        TransportError::new(format!("Failed to enumerate ports: {}", e))
    })?;

    Ok(ports
        .iter()
        .map(to_port_info)
        .filter(SerialPortInfo::is_eligible)
        .collect())
}

fn to_port_info(port: &serialport::SerialPortInfo) -> SerialPortInfo {
    let info = SerialPortInfo::new(&port.port_name, get_port_description(port));
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb_info) => {
            let info = info.with_usb_ids(usb_info.vid, usb_info.pid);
            match usb_info.manufacturer {
                Some(ref mfg) => info.with_manufacturer(mfg),
                None => info,
            }
        }
        _ => info,
    }
}

/// Get a user-friendly description for a port
fn get_port_description(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb_info) => {
            format!(
                "USB {} {}",
                usb_info.manufacturer.as_deref().unwrap_or("Device"),
                usb_info.product.as_deref().unwrap_or("Serial Port")
            )
        }
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

fn to_serialport_parity(parity: SerialParity) -> serialport::Parity {
    match parity {
        SerialParity::None => serialport::Parity::None,
        SerialParity::Even => serialport::Parity::Even,
        SerialParity::Odd => serialport::Parity::Odd,
    }
}

fn to_data_bits(bits: u8) -> TransportResult<serialport::DataBits> {
    match bits {
        5 => Ok(serialport::DataBits::Five),
        6 => Ok(serialport::DataBits::Six),
        7 => Ok(serialport::DataBits::Seven),
        8 => Ok(serialport::DataBits::Eight),
        _ => Err(TransportError::new(format!("Invalid data bits: {}", bits))),
    }
}

fn to_stop_bits(bits: u8) -> TransportResult<serialport::StopBits> {
    match bits {
        1 => Ok(serialport::StopBits::One),
        2 => Ok(serialport::StopBits::Two),
        _ => Err(TransportError::new(format!("Invalid stop bits: {}", bits))),
    }
}

struct OpenPort {
    port_name: String,
    writer: Box<dyn serialport::SerialPort>,
    stop: Arc<AtomicBool>,
}

/// Listener and presence of one monitoring run
///
/// Each `begin_monitoring` gets a fresh instance, so a monitor thread that
/// is still winding down cannot touch the next run's state.
#[derive(Default)]
struct Shared {
    listener: Mutex<Option<Arc<dyn TransportListener>>>,
    present: AtomicBool,
}

impl Shared {
    fn listener(&self) -> Option<Arc<dyn TransportListener>> {
        self.listener.lock().clone()
    }
}

struct Monitor {
    stop: Arc<AtomicBool>,
    shared: Arc<Shared>,
}

impl Monitor {
    fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        *self.shared.listener.lock() = None;
    }
}

/// Serial transport backed by the `serialport` crate
pub struct SerialTransport {
    config: MonitorConfig,
    monitor: Mutex<Option<Monitor>>,
    ports: Mutex<HashMap<u64, OpenPort>>,
    next_handle: AtomicU64,
}

impl SerialTransport {
    /// Create a transport with default monitor timing
    pub fn new() -> Self {
        Self::with_config(MonitorConfig::default())
    }

    /// Create a transport with custom monitor timing
    pub fn with_config(config: MonitorConfig) -> Self {
        Self {
            config,
            monitor: Mutex::new(None),
            ports: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Monitor timing in use
    pub fn config(&self) -> MonitorConfig {
        self.config
    }

    fn scan_present() -> bool {
        match list_ports() {
            Ok(ports) => !ports.is_empty(),
            Err(_) => false,
        }
    }

    fn spawn_monitor(&self, shared: Arc<Shared>, stop: Arc<AtomicBool>) -> TransportResult<()> {
        let config = self.config;
        thread::Builder::new()
            .name("phmetro-monitor".to_string())
            .spawn(move || monitor_loop(shared, config, stop, Self::scan_present))
            .map(|_| ())
            .map_err(|e| TransportError::new(format!("Failed to spawn monitor: {}", e)))
    }
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.end_monitoring();
        for (_, port) in self.ports.lock().drain() {
            port.stop.store(true, Ordering::SeqCst);
        }
    }
}

/// Sleep in short steps so a stop request is noticed quickly
fn sleep_unless_stopped(duration: Duration, stop: &AtomicBool) -> bool {
    let deadline = Instant::now() + duration;
    while !stop.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(50)));
    }
    false
}

/// Poll `scan` for presence changes until `stop` is set
///
/// An attach is reported on the first scan that finds a device. A detach
/// is reported only if the device is still gone after `detach_settle`.
fn monitor_loop(
    shared: Arc<Shared>,
    config: MonitorConfig,
    stop: Arc<AtomicBool>,
    mut scan: impl FnMut() -> bool,
) {
    tracing::debug!("Hot-plug monitor running");
    while sleep_unless_stopped(config.poll_interval, &stop) {
        let was_present = shared.present.load(Ordering::SeqCst);
        let present = scan();
        if stop.load(Ordering::SeqCst) {
            break;
        }

        if present && !was_present {
            shared.present.store(true, Ordering::SeqCst);
            tracing::info!("Serial device attached");
            if let Some(listener) = shared.listener() {
                listener.on_attach();
            }
        } else if !present && was_present {
            tracing::debug!(
                "Serial device gone, settling for {:?}",
                config.detach_settle
            );
            if !sleep_unless_stopped(config.detach_settle, &stop) {
                break;
            }
            if scan() {
                tracing::debug!("Serial device came back during settle");
                continue;
            }
            if stop.load(Ordering::SeqCst) {
                break;
            }
            shared.present.store(false, Ordering::SeqCst);
            tracing::info!("Serial device detached");
            if let Some(listener) = shared.listener() {
                listener.on_detach();
            }
        }
    }
    tracing::debug!("Hot-plug monitor stopped");
}

fn reader_loop(
    shared: Arc<Shared>,
    handle: TransportHandle,
    mut port: Box<dyn serialport::SerialPort>,
    stop: Arc<AtomicBool>,
) {
    let mut buf = [0u8; READ_CHUNK];
    while !stop.load(Ordering::SeqCst) {
        match port.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                tracing::trace!("{} received {} bytes", handle, n);
                if let Some(listener) = shared.listener() {
                    listener.on_data_received(handle, &buf[..n]);
                }
            }
            Err(e) if e.kind() == ErrorKind::TimedOut => {}
            Err(e) => {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                tracing::warn!("{} read failed: {}", handle, e);
                if let Some(listener) = shared.listener() {
                    listener.on_port_error(handle, &e.to_string());
                }
                break;
            }
        }
    }
    tracing::debug!("{} reader stopped", handle);
}

impl Transport for SerialTransport {
    fn name(&self) -> String {
        "serial".to_string()
    }

    fn probe(&self) -> TransportResult<()> {
        serialport::available_ports()
            .map(|_| ())
            .map_err(|e| TransportError::new(format!("Serial driver unavailable: {}", e)))
    }

    fn begin_monitoring(&self, listener: Arc<dyn TransportListener>) -> TransportResult<()> {
        let mut monitor = self.monitor.lock();
        if let Some(old) = monitor.take() {
            old.shutdown();
        }

        let shared = Arc::new(Shared {
            listener: Mutex::new(Some(listener)),
            present: AtomicBool::new(Self::scan_present()),
        });
        let stop = Arc::new(AtomicBool::new(false));
        self.spawn_monitor(Arc::clone(&shared), Arc::clone(&stop))?;
        *monitor = Some(Monitor { stop, shared });
        Ok(())
    }

    fn end_monitoring(&self) {
        if let Some(monitor) = self.monitor.lock().take() {
            monitor.shutdown();
        }
    }

    fn is_device_present(&self) -> bool {
        match self.monitor.lock().as_ref() {
            Some(monitor) => monitor.shared.present.load(Ordering::SeqCst),
            None => Self::scan_present(),
        }
    }

    fn open(&self, settings: &PortSettings) -> TransportResult<TransportHandle> {
        let info = list_ports()?
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::new("No eligible serial device"))?;

        let port = serialport::new(&info.port_name, settings.baud_rate)
            .timeout(READ_TIMEOUT)
            .data_bits(to_data_bits(settings.data_bits)?)
            .stop_bits(to_stop_bits(settings.stop_bits)?)
            .parity(to_serialport_parity(settings.parity))
            .flow_control(serialport::FlowControl::None)
            .open()
            .map_err(|e| {
                tracing::warn!("Failed to open serial port {}: {}", info.port_name, e);
                TransportError::new(format!("Failed to open port {}: {}", info.port_name, e))
            })?;

        let reader = port.try_clone().map_err(|e| {
            TransportError::new(format!("Failed to clone port {}: {}", info.port_name, e))
        })?;

        let handle = TransportHandle::new(self.next_handle.fetch_add(1, Ordering::SeqCst));
        let stop = Arc::new(AtomicBool::new(false));
        let shared = self
            .monitor
            .lock()
            .as_ref()
            .map(|monitor| Arc::clone(&monitor.shared))
            .unwrap_or_default();
        let reader_stop = Arc::clone(&stop);
        thread::Builder::new()
            .name(format!("phmetro-reader-{}", handle.id()))
            .spawn(move || reader_loop(shared, handle, reader, reader_stop))
            .map_err(|e| TransportError::new(format!("Failed to spawn reader: {}", e)))?;

        tracing::info!("Opened {} as {} ({})", info.port_name, handle, settings);
        self.ports.lock().insert(
            handle.id(),
            OpenPort {
                port_name: info.port_name,
                writer: port,
                stop,
            },
        );
        Ok(handle)
    }

    fn close(&self, handle: TransportHandle) {
        if let Some(port) = self.ports.lock().remove(&handle.id()) {
            port.stop.store(true, Ordering::SeqCst);
            tracing::info!("Closed {} ({})", port.port_name, handle);
        }
    }

    fn write(&self, handle: TransportHandle, data: &[u8]) -> TransportResult<()> {
        let mut ports = self.ports.lock();
        let port = ports
            .get_mut(&handle.id())
            .ok_or_else(|| TransportError::new(format!("{} is not open", handle)))?;
        port.writer
            .write_all(data)
            .and_then(|_| port.writer.flush())
            .map_err(|e| TransportError::new(format!("Write to {} failed: {}", port.port_name, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Calls(Mutex<Vec<&'static str>>);

    impl TransportListener for Calls {
        fn on_attach(&self) {
            self.0.lock().push("attach");
        }

        fn on_detach(&self) {
            self.0.lock().push("detach");
        }

        fn on_data_received(&self, _handle: TransportHandle, _data: &[u8]) {}

        fn on_port_error(&self, _handle: TransportHandle, _reason: &str) {
            self.0.lock().push("port error");
        }
    }

    /// Run the monitor over scripted scan results until `scans` scans have
    /// happened. The last scripted result repeats.
    fn run_monitor(initially_present: bool, script: &[bool], scans: usize) -> Vec<&'static str> {
        let calls = Arc::new(Calls::default());
        let shared = Arc::new(Shared {
            listener: Mutex::new(Some(calls.clone() as Arc<dyn TransportListener>)),
            present: AtomicBool::new(initially_present),
        });
        let config = MonitorConfig {
            poll_interval: Duration::from_millis(2),
            detach_settle: Duration::from_millis(10),
        };
        let stop = Arc::new(AtomicBool::new(false));
        let count = Arc::new(AtomicUsize::new(0));

        let mut results: VecDeque<bool> = script.iter().copied().collect();
        let mut last = initially_present;
        let scan_count = Arc::clone(&count);
        let scan = move || {
            scan_count.fetch_add(1, Ordering::SeqCst);
            if let Some(next) = results.pop_front() {
                last = next;
            }
            last
        };

        let thread_stop = Arc::clone(&stop);
        let monitor = thread::spawn(move || monitor_loop(shared, config, thread_stop, scan));

        let deadline = Instant::now() + Duration::from_secs(5);
        while count.load(Ordering::SeqCst) < scans && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        stop.store(true, Ordering::SeqCst);
        monitor.join().unwrap();
        assert!(count.load(Ordering::SeqCst) >= scans);

        let calls = calls.0.lock().clone();
        calls
    }

    #[test]
    fn test_monitor_reports_attach() {
        assert_eq!(run_monitor(false, &[false, true], 4), vec!["attach"]);
    }

    #[test]
    fn test_monitor_ignores_replug_during_settle() {
        assert_eq!(run_monitor(true, &[false, true], 5), Vec::<&str>::new());
    }

    #[test]
    fn test_monitor_reports_detach_after_settle() {
        assert_eq!(run_monitor(true, &[false, false], 5), vec!["detach"]);
    }

    #[test]
    fn test_monitor_reports_each_change_once() {
        assert_eq!(
            run_monitor(false, &[true, true, false, false, true], 8),
            vec!["attach", "detach", "attach"]
        );
    }

    #[test]
    fn test_end_monitoring_clears_listener() {
        let transport = SerialTransport::new();
        let shared = Arc::new(Shared {
            listener: Mutex::new(Some(Arc::new(Calls::default()) as Arc<dyn TransportListener>)),
            present: AtomicBool::new(true),
        });
        let stop = Arc::new(AtomicBool::new(false));
        *transport.monitor.lock() = Some(Monitor {
            stop: Arc::clone(&stop),
            shared: Arc::clone(&shared),
        });
        assert!(transport.is_device_present());

        transport.end_monitoring();
        assert!(stop.load(Ordering::SeqCst));
        assert!(shared.listener().is_none());
    }

    #[test]
    fn test_root_hub_is_not_eligible() {
        for pid in 1..=3 {
            let hub =
                SerialPortInfo::new("/dev/bus/usb/001", "hub").with_usb_ids(ROOT_HUB_VID, pid);
            assert!(hub.is_root_hub());
            assert!(!hub.is_eligible());
        }
    }

    #[test]
    fn test_usb_adapter_is_eligible() {
        let ftdi = SerialPortInfo::new("/dev/ttyUSB0", "USB FTDI FT232R")
            .with_usb_ids(0x0403, 0x6001)
            .with_manufacturer("FTDI");
        assert!(ftdi.is_eligible());
        assert_eq!(ftdi.manufacturer.as_deref(), Some("FTDI"));

        // Same vendor as root hubs but not a hub product
        let gadget =
            SerialPortInfo::new("/dev/ttyGS0", "gadget").with_usb_ids(ROOT_HUB_VID, 0x0104);
        assert!(gadget.is_eligible());
    }

    #[test]
    fn test_non_usb_port_is_not_eligible() {
        let builtin = SerialPortInfo::new("/dev/ttyS0", "Serial Port");
        assert!(!builtin.is_usb());
        assert!(!builtin.is_eligible());
    }

    #[test]
    fn test_line_parameter_conversion() {
        assert_eq!(to_data_bits(8), Ok(serialport::DataBits::Eight));
        assert_eq!(to_data_bits(5), Ok(serialport::DataBits::Five));
        assert!(to_data_bits(9).is_err());
        assert_eq!(to_stop_bits(2), Ok(serialport::StopBits::Two));
        assert!(to_stop_bits(3).is_err());
        assert_eq!(
            to_serialport_parity(SerialParity::Even),
            serialport::Parity::Even
        );
    }

    #[test]
    fn test_monitor_defaults() {
        let config = MonitorConfig::default();
        assert_eq!(config.detach_settle, Duration::from_secs(2));
        assert_eq!(SerialTransport::new().config(), config);
    }

    #[test]
    fn test_sleep_unless_stopped() {
        let stop = AtomicBool::new(true);
        assert!(!sleep_unless_stopped(Duration::from_secs(10), &stop));
        stop.store(false, Ordering::SeqCst);
        assert!(sleep_unless_stopped(Duration::from_millis(1), &stop));
    }

    #[test]
    fn test_write_to_unknown_handle_fails() {
        let transport = SerialTransport::new();
        assert!(transport.write(TransportHandle::new(42), b"P\r").is_err());
        transport.close(TransportHandle::new(42));
    }
}
