//! Serial port handling
//!
//! Discovers and opens the USB serial port the robot's Arduino enumerates as.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::time::Duration;

use super::{ProtocolError, DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT_MS};

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyACM0" or "COM3")
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

    /// Whether the USB descriptor looks like an Arduino board
    pub fn is_arduino(&self) -> bool {
        // 0x2341 Arduino SA, 0x2a03 Arduino.org, 0x1a86 CH340 clones
        matches!(self.vid, Some(0x2341) | Some(0x2a03) | Some(0x1a86))
            || self
                .manufacturer
                .as_deref()
                .is_some_and(|m| m.to_ascii_lowercase().contains("arduino"))
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb_info) => Self {
                name: info.port_name,
                vid: Some(usb_info.vid),
                pid: Some(usb_info.pid),
                manufacturer: usb_info.manufacturer,
                product: usb_info.product,
            },
            _ => Self::bare(info.port_name),
        }
    }
}

/// Sort key placing ttyACM* first, then ttyUSB*, each numerically, then the rest by name
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// List all available serial ports, with /dev fallbacks and deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    match serialport::available_ports() {
        Ok(ports) => {
            for info in ports {
                let p = PortInfo::from(info);
                map.entry(p.name.clone()).or_insert(p);
            }
        }
        Err(e) => tracing::debug!("serial port enumeration failed: {e}"),
    }

    // Linux-only: udev may not report every CDC device
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone())
                        .or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// Open a serial port.
///
/// The read timeout is kept short so a poll cycle never stalls on a quiet line.
pub fn open_port(
    name: &str,
    baud_rate: Option<u32>,
    read_timeout: Option<Duration>,
) -> Result<Box<dyn SerialPort>, ProtocolError> {
    let baud = baud_rate.unwrap_or(DEFAULT_BAUD_RATE);
    let timeout = read_timeout.unwrap_or(Duration::from_millis(DEFAULT_READ_TIMEOUT_MS));

    tracing::debug!(port = name, baud, "opening serial port");
    serialport::new(name, baud)
        .timeout(timeout)
        .open()
        .map_err(ProtocolError::from)
}

/// Configure a serial port for the robot: 8N1, no flow control.
///
/// With `hold_dtr` set, DTR and RTS are asserted so the Arduino is not
/// reset into its bootloader by the open.
pub fn configure_port(port: &mut dyn SerialPort, hold_dtr: bool) -> Result<(), ProtocolError> {
    port.set_data_bits(serialport::DataBits::Eight)?;
    port.set_parity(serialport::Parity::None)?;
    port.set_stop_bits(serialport::StopBits::One)?;
    port.set_flow_control(serialport::FlowControl::None)?;

    if !hold_dtr {
        return Ok(());
    }

    if let Err(e) = port.write_data_terminal_ready(true) {
        tracing::debug!("failed to set DTR high: {e} (continuing)");
    }
    if let Err(e) = port.write_request_to_send(true) {
        tracing::debug!("failed to set RTS high: {e} (continuing)");
    }

    Ok(())
}
