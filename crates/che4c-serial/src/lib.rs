//! # CHE4C Serial Library
//!
//! Host-side serial transceiver for the CHE4C chess robot.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Serial port discovery and opening for the robot's Arduino controller
//! - A transceiver with fire-and-forget sends and stuck-write detection
//! - A registry that routes polled lines to the right transceiver
//! - Control status codes and a status line interpreter
//! - A tokio poll driver and JSON host configuration
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use che4c_serial::prelude::*;
//!
//! # fn main() -> Result<(), ProtocolError> {
//! let registry = Arc::new(TransceiverRegistry::new());
//! let status = Arc::new(StatusInterpreter::new());
//! let robot = Transceiver::new(&registry, status.clone());
//!
//! let link = SerialLink::open(&LinkConfig::new("/dev/ttyACM0"))?;
//! robot.connect(link.clone());
//! robot.send_status(ControlStatus::Calculating);
//!
//! // once per frame
//! registry.poll(Some(&link));
//! println!("robot reports {:?}", status.current());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod driver;
pub mod protocol;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{HostConfig, LinkConfig, TransceiverConfig};
    pub use crate::driver::PollDriver;
    pub use crate::protocol::{
        ConnectionState, ControlStatus, LineInterpreter, ProtocolError, SerialLink,
        StatusInterpreter, Transceiver, TransceiverRegistry,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
