//! Host configuration
//!
//! Serial and transceiver settings, stored as JSON next to the host program.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::protocol::{
    ProtocolError, DEFAULT_BAUD_RATE, DEFAULT_POLL_INTERVAL_MS, DEFAULT_READ_TIMEOUT_MS,
    STALE_TRANSMISSION_MS,
};

/// How to open the serial port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Serial port name (e.g. "/dev/ttyACM0" or "COM3")
    pub port_name: String,

    /// Baud rate
    pub baud_rate: u32,

    /// Read timeout in milliseconds
    pub read_timeout_ms: u64,

    /// Keep DTR/RTS asserted so opening the port does not reset the Arduino
    pub hold_dtr: bool,
}

impl LinkConfig {
    /// Defaults with the given port
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            hold_dtr: true,
        }
    }
}

/// Transceiver timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransceiverConfig {
    /// Age in milliseconds after which a running transmission counts as stuck
    pub stale_after_ms: u64,

    /// Poll cadence in milliseconds
    pub poll_interval_ms: u64,
}

impl TransceiverConfig {
    /// Age past which a running transmission counts as stuck
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    /// Poll period, at least 1 ms
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for TransceiverConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: STALE_TRANSMISSION_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

/// Complete host configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Serial link settings
    pub link: LinkConfig,
    /// Transceiver and poll timing
    pub transceiver: TransceiverConfig,
}

impl HostConfig {
    /// Load a configuration file; missing fields take their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ProtocolError> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: HostConfig = serde_json::from_str(&content).map_err(|e| {
            ProtocolError::ConfigError(format!("{}: {}", path.as_ref().display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ProtocolError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        if self.link.baud_rate == 0 {
            return Err(ProtocolError::ConfigError("baud_rate must be non-zero".into()));
        }
        if self.transceiver.stale_after_ms == 0 {
            return Err(ProtocolError::ConfigError(
                "stale_after_ms must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
