//! CAN-over-UDP frame codec
//!
//! Every datagram is exactly 13 bytes: a big-endian 29-bit CAN identifier,
//! one DLC byte, and eight payload bytes (zero padded).
//!
//! Identifier layout: `prio << 25 | (command << 1 | response) << 16 | hash`.

use bytes::{Buf, BufMut};
use std::fmt;

use super::{Command, Direction};
use crate::error::FrameError;

/// Size of a datagram on the wire
pub const FRAME_LEN: usize = 13;
/// Size of the (padded) payload
pub const PAYLOAD_LEN: usize = 8;

/// Compute the CS2 address hash for a device uid
///
/// The high and low halves of the uid are XORed, then the result is spread so
/// bits 7-9 are always `0b110` (the `0x0300` marker) and the low 7 bits are
/// kept in place.
pub fn address_hash(uid: u32) -> u16 {
    let h = (uid >> 16) ^ (uid & 0xFFFF);
    (((h << 3) & 0xFF00) | 0x0300 | (h & 0x7F)) as u16
}

/// Pack a 29-bit CAN identifier
pub fn build_identifier(uid: u32, command: u8, prio: u8, response: bool) -> u32 {
    let cmd_resp = ((command as u32) << 1) | response as u32;
    ((prio as u32) << 25) | (cmd_resp << 16) | address_hash(uid) as u32
}

/// Outbound request with its per-command payload layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// Track power: device uid, 1 = running
    System { device_uid: u32, running: bool },
    /// Loco speed: loco uid, speed (0-1023)
    Speed { loc_id: u32, speed: u16 },
    /// Loco direction: loco uid, direction code
    Direction { loc_id: u32, direction: Direction },
    /// Loco function: loco uid, function index, 0/1
    Function { loc_id: u32, index: u8, active: bool },
    /// Accessory: article uid, position, fixed `0x01` (power on)
    Switch { article_uid: u32, value: u8 },
}

impl Request {
    /// Command code for this request
    pub fn command(&self) -> Command {
        match self {
            Request::System { .. } => Command::System,
            Request::Speed { .. } => Command::Speed,
            Request::Direction { .. } => Command::Direction,
            Request::Function { .. } => Command::Function,
            Request::Switch { .. } => Command::Switch,
        }
    }

    /// Encode the payload, zero padded to 8 bytes
    pub fn encode_payload(&self) -> [u8; PAYLOAD_LEN] {
        let mut data = [0u8; PAYLOAD_LEN];
        let mut buf = &mut data[..];
        match *self {
            Request::System { device_uid, running } => {
                buf.put_u32(device_uid);
                buf.put_u8(running as u8);
            }
            Request::Speed { loc_id, speed } => {
                buf.put_u32(loc_id);
                buf.put_u16(speed);
            }
            Request::Direction { loc_id, direction } => {
                buf.put_u32(loc_id);
                buf.put_u8(direction.code());
            }
            Request::Function { loc_id, index, active } => {
                buf.put_u32(loc_id);
                buf.put_u8(index);
                buf.put_u8(active as u8);
            }
            Request::Switch { article_uid, value } => {
                buf.put_u32(article_uid);
                buf.put_u8(value);
                buf.put_u8(0x01);
            }
        }
        data
    }
}

/// A single CAN frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// 29-bit identifier
    pub identifier: u32,
    /// Declared data length (0-8)
    pub dlc: u8,
    /// Payload, always 8 bytes
    pub data: [u8; PAYLOAD_LEN],
}

impl Frame {
    /// Build the outbound frame for a request, addressed with `device_uid`
    ///
    /// Outbound frames always use priority 0 and a cleared response bit.
    pub fn request(device_uid: u32, request: &Request) -> Self {
        let command = request.command();
        Self {
            identifier: build_identifier(device_uid, command.code(), 0, false),
            dlc: command.request_dlc(),
            data: request.encode_payload(),
        }
    }

    /// Decode a datagram; anything but exactly 13 bytes is rejected
    pub fn decode(datagram: &[u8]) -> Result<Self, FrameError> {
        if datagram.len() != FRAME_LEN {
            return Err(FrameError::BadLength {
                len: datagram.len(),
                expected: FRAME_LEN,
            });
        }
        let mut buf = datagram;
        let identifier = buf.get_u32();
        let dlc = buf.get_u8();
        let mut data = [0u8; PAYLOAD_LEN];
        buf.copy_to_slice(&mut data);
        Ok(Self {
            identifier,
            dlc,
            data,
        })
    }

    /// Encode to a 13-byte datagram
    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut out = [0u8; FRAME_LEN];
        let mut buf = &mut out[..];
        buf.put_u32(self.identifier);
        buf.put_u8(self.dlc);
        buf.put_slice(&self.data);
        out
    }

    /// Raw 8-bit command code
    pub fn command_code(&self) -> u8 {
        (self.cmd_resp() >> 1) as u8
    }

    /// Supported command, if recognised
    pub fn command(&self) -> Option<Command> {
        Command::from_code(self.command_code())
    }

    /// Whether the response bit is set (device-originated status)
    pub fn is_response(&self) -> bool {
        self.cmd_resp() & 1 == 1
    }

    /// Priority bits
    pub fn priority(&self) -> u8 {
        ((self.identifier >> 25) & 0x0F) as u8
    }

    /// Address hash (low 16 bits of the identifier)
    pub fn hash(&self) -> u16 {
        (self.identifier & 0xFFFF) as u16
    }

    /// Big-endian uid in payload bytes 0..4
    pub fn uid(&self) -> u32 {
        u32::from_be_bytes([self.data[0], self.data[1], self.data[2], self.data[3]])
    }

    /// Payload bytes covered by the DLC
    pub fn payload(&self) -> &[u8] {
        &self.data[..(self.dlc as usize).min(PAYLOAD_LEN)]
    }

    fn cmd_resp(&self) -> u32 {
        (self.identifier >> 16) & 0x1FF
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = if self.is_response() { "RSP" } else { "REQ" };
        match self.command() {
            Some(cmd) => write!(f, "{} {}", cmd, dir)?,
            None => write!(f, "CMD 0x{:02X} {}", self.command_code(), dir)?,
        }
        write!(
            f,
            " hash=0x{:04X} dlc={} [{}]",
            self.hash(),
            self.dlc,
            format_hex(self.payload())
        )
    }
}

/// Format bytes as spaced upper-case hex for logging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| hex::encode_upper([*b]))
        .collect::<Vec<_>>()
        .join(" ")
}
