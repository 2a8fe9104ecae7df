//! State type definitions
//!
//! Runtime state records, read snapshots, and the event schema pushed to
//! subscribers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::protocol::{system_sub, Direction};

/// Number of addressable switch slots
pub const SWITCH_COUNT: usize = 64;

/// Highest valid loco speed
pub const MAX_SPEED: u16 = 1023;

/// Highest valid function index
pub const MAX_FUNCTION: u8 = 31;

/// Track/system run mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemState {
    /// Track power off
    #[default]
    Stopped,
    /// Track power on
    Running,
    /// Emergency halt
    Halted,
}

impl SystemState {
    /// Map an inbound SYSTEM sub-code (0/1/2)
    pub fn from_sub_code(sub: u8) -> Option<Self> {
        match sub {
            system_sub::STOP => Some(SystemState::Stopped),
            system_sub::GO => Some(SystemState::Running),
            system_sub::HALT => Some(SystemState::Halted),
            _ => None,
        }
    }

    /// Run flag as published to subscribers (only `Running` counts)
    pub fn status_flag(self) -> u8 {
        (self == SystemState::Running) as u8
    }
}

impl std::fmt::Display for SystemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SystemState::Stopped => write!(f, "stopped"),
            SystemState::Running => write!(f, "running"),
            SystemState::Halted => write!(f, "halted"),
        }
    }
}

/// Volatile runtime state of one locomotive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocoState {
    /// Speed step (0-1023)
    pub speed: u16,
    /// Last commanded or reported direction
    pub direction: Direction,
    /// Function index -> active
    pub functions: BTreeMap<u8, bool>,
}

impl Default for LocoState {
    fn default() -> Self {
        Self {
            speed: 0,
            direction: Direction::Forward,
            functions: BTreeMap::new(),
        }
    }
}

/// Immutable copy of the whole runtime state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateSnapshot {
    /// Current run mode
    pub system: SystemState,
    /// Runtime state per loco uid
    pub locos: BTreeMap<u32, LocoState>,
    /// Switch values, indexed 0-63
    pub switches: Vec<i64>,
}

/// State change notification, serialized as one JSON object per message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Run mode changed (`status` is 1 only when running)
    System { status: u8 },
    /// Loco speed written
    Speed { loc_id: u32, value: u16 },
    /// Loco direction written
    Direction { loc_id: u32, value: Direction },
    /// Loco function written
    Function {
        loc_id: u32,
        #[serde(rename = "fn")]
        index: u8,
        value: u8,
    },
    /// Switch written
    Switch { idx: usize, value: i64 },
    /// Background failure report
    Error { message: String },
    /// Catalog metadata changed; viewers should refetch it
    LocoListReloaded,
}

impl Event {
    /// Build an error event
    pub fn error(message: impl Into<String>) -> Self {
        Event::Error {
            message: message.into(),
        }
    }
}
