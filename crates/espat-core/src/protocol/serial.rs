//! Serial port handling
//!
//! Host-side access to the module's UART: port discovery, configuration and a
//! [`Transmit`] implementation with a reader thread feeding the receive buffer.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::{EspError, Transmit, DEFAULT_BAUD_RATE};
use crate::buffer::RxProducer;

/// Read/write timeout; also bounds how long a transmit can block
const PORT_TIMEOUT_MS: u64 = 100;

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                manufacturer: usb.manufacturer,
                product: usb.product,
            },
            _ => Self::bare(info.port_name),
        }
    }
}

/// USB-serial bridges (CP210x, CH340, FTDI) first, numerically by suffix
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    for (rank, prefix) in [(0u8, "ttyUSB"), (1, "ttyACM")] {
        if let Some(rest) = basename.strip_prefix(prefix) {
            let num = rest.parse::<usize>().unwrap_or(usize::MAX);
            return (rank, num, basename.to_string());
        }
    }
    (2, 0, basename.to_string())
}

/// List serial ports, including `/dev/ttyUSB*` entries the API missed
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyUSB") || fname.starts_with("ttyACM") {
                    let full = format!("/dev/{fname}");
                    map.entry(full.clone())
                        .or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut ports: Vec<PortInfo> = map.into_values().collect();
    ports.sort_by_key(|p| port_sort_key(&p.name));
    ports
}

/// Open a serial port with a short timeout
pub fn open_port(name: &str, baud_rate: Option<u32>) -> Result<Box<dyn SerialPort>, EspError> {
    let baud = baud_rate.unwrap_or(DEFAULT_BAUD_RATE);
    serialport::new(name, baud)
        .timeout(Duration::from_millis(PORT_TIMEOUT_MS))
        .open()
        .map_err(|e| EspError::Transport(e.to_string()))
}

/// 8N1 without flow control
pub fn configure_port(port: &mut dyn SerialPort) -> Result<(), EspError> {
    port.set_data_bits(serialport::DataBits::Eight)
        .map_err(|e| EspError::Transport(e.to_string()))?;
    port.set_parity(serialport::Parity::None)
        .map_err(|e| EspError::Transport(e.to_string()))?;
    port.set_stop_bits(serialport::StopBits::One)
        .map_err(|e| EspError::Transport(e.to_string()))?;
    port.set_flow_control(serialport::FlowControl::None)
        .map_err(|e| EspError::Transport(e.to_string()))?;
    Ok(())
}

/// Clear the serial port buffers
pub fn clear_buffers(port: &mut dyn SerialPort) -> Result<(), EspError> {
    port.clear(serialport::ClearBuffer::All)
        .map_err(|e| EspError::Transport(e.to_string()))
}

/// Serial link to the module
///
/// Writes go straight to the port. A background thread reads the port and
/// pushes every byte into the receive buffer until the transport is dropped.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl SerialTransport {
    /// Open and configure `name`, starting the reader thread
    pub fn open(name: &str, baud_rate: u32, producer: RxProducer) -> Result<Self, EspError> {
        let mut port = open_port(name, Some(baud_rate))?;
        configure_port(port.as_mut())?;
        clear_buffers(port.as_mut())?;

        let reader_port = port
            .try_clone()
            .map_err(|e| EspError::Transport(e.to_string()))?;
        let stop = Arc::new(AtomicBool::new(false));
        let reader = spawn_reader(reader_port, producer, stop.clone());
        debug!("opened {name} at {baud_rate} baud");

        Ok(Self {
            port,
            stop,
            reader: Some(reader),
        })
    }
}

fn spawn_reader(
    mut port: Box<dyn SerialPort>,
    mut producer: RxProducer,
    stop: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut buf = [0u8; 256];
        while !stop.load(Ordering::Acquire) {
            match port.read(&mut buf) {
                Ok(0) => {}
                Ok(n) => {
                    if !forward(&mut producer, &buf[..n], &stop) {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::TimedOut => {}
                Err(e) => {
                    warn!("serial read failed: {e}");
                    break;
                }
            }
        }
    })
}

/// Hand every byte to the receive buffer, waiting while it is full.
/// Returns false if `stop` was raised first.
fn forward(producer: &mut RxProducer, mut bytes: &[u8], stop: &AtomicBool) -> bool {
    let mut waited = false;
    while !bytes.is_empty() {
        let accepted = producer.try_push(bytes);
        bytes = &bytes[accepted..];
        if bytes.is_empty() {
            break;
        }
        if stop.load(Ordering::Acquire) {
            return false;
        }
        if !waited {
            trace!("receive buffer full, waiting for the engine");
            waited = true;
        }
        std::thread::sleep(Duration::from_micros(200));
    }
    true
}

impl Transmit for SerialTransport {
    fn transmit(&mut self, bytes: &[u8]) -> Result<(), EspError> {
        self.port
            .write_all(bytes)
            .and_then(|_| self.port.flush())
            .map_err(|e| EspError::Transport(e.to_string()))
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}
