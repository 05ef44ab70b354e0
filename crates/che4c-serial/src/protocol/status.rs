//! Control status codes
//!
//! The closed set of states exchanged with the robot's controller. Each state
//! travels as a small integer on its own line.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Control state of the robot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlStatus {
    /// Nothing to do
    Idle,

    /// Host is searching for a move
    Calculating,

    /// Arm is moving a piece
    Moving,

    /// Detected board does not match a legal position
    InvalidBoard,

    /// Waiting for the human to move
    WaitingForPlayer,

    /// Game is over
    GameEnded,
}

impl ControlStatus {
    /// Every status, in code order
    pub const ALL: [ControlStatus; 6] = [
        ControlStatus::Idle,
        ControlStatus::Calculating,
        ControlStatus::Moving,
        ControlStatus::InvalidBoard,
        ControlStatus::WaitingForPlayer,
        ControlStatus::GameEnded,
    ];

    /// Get the status byte sent on the wire
    pub fn status_byte(&self) -> u8 {
        match self {
            ControlStatus::Idle => 0,
            ControlStatus::Calculating => 1,
            ControlStatus::Moving => 2,
            ControlStatus::InvalidBoard => 3,
            ControlStatus::WaitingForPlayer => 4,
            ControlStatus::GameEnded => 5,
        }
    }

    /// Look up the status for a status byte.
    ///
    /// Returns `None` for codes outside the set; a newer firmware or line
    /// noise can produce them, so callers should not treat this as fatal.
    pub fn from_status_byte(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.status_byte() == code)
    }

    /// Like [`from_status_byte`](Self::from_status_byte) for any integer width
    pub fn from_code(code: i64) -> Option<Self> {
        u8::try_from(code).ok().and_then(Self::from_status_byte)
    }

    fn name(&self) -> &'static str {
        match self {
            ControlStatus::Idle => "IDLE",
            ControlStatus::Calculating => "CALCULATING",
            ControlStatus::Moving => "MOVING",
            ControlStatus::InvalidBoard => "INVALID_BOARD",
            ControlStatus::WaitingForPlayer => "WAITING_FOR_PLAYER",
            ControlStatus::GameEnded => "GAME_ENDED",
        }
    }
}

impl fmt::Display for ControlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown status name
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown control status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for ControlStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|status| status.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownStatus(wanted.to_string()))
    }
}

/// Format a status as the line sent to the controller
pub fn encode_status_line(status: ControlStatus) -> String {
    format!("{}\n", status.status_byte())
}
