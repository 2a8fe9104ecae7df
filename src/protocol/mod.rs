//! CS2 CAN-over-UDP protocol definitions
//!
//! Command codes, direction codes and system sub-codes for the subset of the
//! Märklin CS2 protocol this gateway speaks. The wire codec lives in [`frame`].

pub mod frame;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use frame::{
    address_hash, build_identifier, format_hex, Frame, Request, FRAME_LEN, PAYLOAD_LEN,
};

/// CAN command codes used by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// System commands (stop/go/halt)
    System = 0,
    /// Locomotive speed
    Speed = 4,
    /// Locomotive direction
    Direction = 5,
    /// Locomotive function on/off
    Function = 6,
    /// Accessory (switch) article
    Switch = 11,
}

impl Command {
    /// Map a raw 8-bit command code; codes outside the supported subset yield `None`
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Command::System),
            4 => Some(Command::Speed),
            5 => Some(Command::Direction),
            6 => Some(Command::Function),
            11 => Some(Command::Switch),
            _ => None,
        }
    }

    /// Raw command code
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Declared data length of an outbound request for this command
    pub fn request_dlc(self) -> u8 {
        match self {
            Command::System | Command::Direction => 5,
            Command::Speed | Command::Function | Command::Switch => 6,
        }
    }

    /// Minimum data length an inbound response must declare to be routed
    pub fn min_response_dlc(self) -> u8 {
        match self {
            Command::System | Command::Direction | Command::Function => 5,
            Command::Speed | Command::Switch => 6,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::System => write!(f, "SYSTEM"),
            Command::Speed => write!(f, "SPEED"),
            Command::Direction => write!(f, "DIRECTION"),
            Command::Function => write!(f, "FUNCTION"),
            Command::Switch => write!(f, "SWITCH"),
        }
    }
}

/// Locomotive direction codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum Direction {
    /// Keep current direction
    Keep = 0,
    /// Forward
    #[default]
    Forward = 1,
    /// Reverse
    Reverse = 2,
    /// Toggle current direction
    Toggle = 3,
}

impl Direction {
    /// Map a raw direction code (0-3)
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Direction::Keep),
            1 => Some(Direction::Forward),
            2 => Some(Direction::Reverse),
            3 => Some(Direction::Toggle),
            _ => None,
        }
    }

    /// Raw direction code
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl From<Direction> for u8 {
    fn from(d: Direction) -> u8 {
        d.code()
    }
}

impl TryFrom<u8> for Direction {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Direction::from_code(code).ok_or_else(|| format!("invalid direction code {}", code))
    }
}

/// System sub-codes carried in byte 4 of a SYSTEM payload
pub mod system_sub {
    /// Track power off
    pub const STOP: u8 = 0x00;
    /// Track power on
    pub const GO: u8 = 0x01;
    /// Emergency halt (power on, all locos stopped)
    pub const HALT: u8 = 0x02;
}
