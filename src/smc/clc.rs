//! CLC message header
//!
//! Every CLC message starts with the same 8-byte header:
//!
//! ```text
//! 0               4      5             7      8
//! +---------------+------+-------------+------+
//! |  eyecatcher   | type |   length    | flags|
//! +---------------+------+-------------+------+
//! ```
//!
//! `length` is big endian and covers the whole message. Only the header is
//! decoded here; message bodies are left alone.

use std::fmt;

use super::SMC_EYECATCHER;

/// Size of the fixed CLC header
pub const CLC_HEADER_LEN: usize = 8;

/// Parsed CLC header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClcHeader {
    pub eyecatcher: [u8; 4],
    /// Raw message type
    pub msg_type: u8,
    /// Total message length
    pub length: u16,
    /// Flag bitfield (version and per-type bits)
    pub flags: u8,
}

impl ClcHeader {
    /// Parse the header from the start of `buf`.
    ///
    /// Returns `None` when fewer than 8 bytes are available or when the
    /// eyecatcher does not match exactly.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < CLC_HEADER_LEN || buf[0..4] != SMC_EYECATCHER {
            return None;
        }

        Some(Self {
            eyecatcher: SMC_EYECATCHER,
            msg_type: buf[4],
            length: u16::from_be_bytes([buf[5], buf[6]]),
            flags: buf[7],
        })
    }

    /// Message type for display
    pub fn kind(&self) -> ClcMessageType {
        ClcMessageType::from(self.msg_type)
    }
}

impl fmt::Display for ClcHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "type=0x{:02x} ({}) length={} flags=0x{:02x}",
            self.msg_type,
            self.kind(),
            self.length,
            self.flags
        )
    }
}

/// CLC message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClcMessageType {
    Proposal,
    Accept,
    Confirm,
    Decline,
    Unknown(u8),
}

impl From<u8> for ClcMessageType {
    fn from(val: u8) -> Self {
        match val {
            0x01 => ClcMessageType::Proposal,
            0x02 => ClcMessageType::Accept,
            0x03 => ClcMessageType::Confirm,
            0x04 => ClcMessageType::Decline,
            other => ClcMessageType::Unknown(other),
        }
    }
}

impl fmt::Display for ClcMessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClcMessageType::Proposal => write!(f, "proposal"),
            ClcMessageType::Accept => write!(f, "accept"),
            ClcMessageType::Confirm => write!(f, "confirm"),
            ClcMessageType::Decline => write!(f, "decline"),
            ClcMessageType::Unknown(n) => write!(f, "unknown {}", n),
        }
    }
}
