//! Protocol errors

use thiserror::Error;

/// Errors raised while setting up a link to the robot.
///
/// The transceiver itself never surfaces these: `send` collapses every
/// failure into `false` and a forced disconnect.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Opening or configuring the port failed
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// No device behind the port name
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Missing or invalid settings
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<serialport::Error> for ProtocolError {
    fn from(err: serialport::Error) -> Self {
        match err.kind() {
            serialport::ErrorKind::NoDevice => ProtocolError::PortNotFound(err.description),
            _ => ProtocolError::SerialError(err.to_string()),
        }
    }
}
