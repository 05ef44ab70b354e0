//! Serial Protocol Communication
//!
//! Line-oriented transport between the host and the robot's Arduino
//! controller. Outbound payloads are written by fire-and-forget transmission
//! tasks; inbound lines are drained by polling and routed through the
//! [`TransceiverRegistry`] to each transceiver's [`LineInterpreter`].

mod error;
pub mod interpreter;
pub mod link;
pub mod memory;
pub mod registry;
pub mod serial;
mod status;
pub mod stream;
pub mod transceiver;
pub mod transmission;

pub use error::ProtocolError;
pub use interpreter::{LineInterpreter, StatusInterpreter};
pub use link::{LinkStats, SerialLink};
pub use memory::{MemoryChannel, MemoryDevice};
pub use registry::TransceiverRegistry;
pub use serial::{configure_port, list_ports, open_port, PortInfo};
pub use status::{encode_status_line, ControlStatus, UnknownStatus};
pub use stream::{CommunicationChannel, SerialChannel};
pub use transceiver::{ConnectionState, Transceiver, TransceiverId};
pub use transmission::{TransmissionId, TransmissionTask};

/// Default baud rate of the robot's firmware
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default serial read timeout in milliseconds
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;

/// A transmission still running after this many milliseconds marks the link as stalled
pub const STALE_TRANSMISSION_MS: u64 = 2000;

/// Default cadence of the poll driver in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// Longest unterminated line buffered before it is flushed as-is
pub const MAX_LINE_LENGTH: usize = 4096;
