//! Packet representations
//!
//! `RawPacket` is what a capture source hands over; `TcpSegment` is what is
//! left after parsing when the packet turns out to be TCP over IP.

use std::fmt;

use chrono::{DateTime, Utc};

use super::flow::{FlowKey, StreamKey};

/// Link-layer framing of captured bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    /// DLT_EN10MB
    Ethernet,
    /// DLT_RAW / LINKTYPE_RAW, bare IPv4 or IPv6
    RawIp,
    /// Linux cooked capture v1 ("any" interface)
    LinuxSll,
    Other(u32),
}

impl LinkType {
    /// Map a pcap link-type number
    pub fn from_dlt(dlt: u32) -> Self {
        match dlt {
            1 => LinkType::Ethernet,
            12 | 101 => LinkType::RawIp,
            113 => LinkType::LinuxSll,
            other => LinkType::Other(other),
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkType::Ethernet => write!(f, "EN10MB"),
            LinkType::RawIp => write!(f, "RAW"),
            LinkType::LinuxSll => write!(f, "LINUX_SLL"),
            LinkType::Other(n) => write!(f, "DLT({})", n),
        }
    }
}

/// Packet as delivered by a capture source
#[derive(Debug, Clone)]
pub struct RawPacket {
    /// Capture timestamp
    pub timestamp: DateTime<Utc>,
    /// Framing of `data`
    pub link: LinkType,
    /// Captured bytes (possibly truncated to the snapshot length)
    pub data: Vec<u8>,
}

impl RawPacket {
    pub fn new(timestamp: DateTime<Utc>, link: LinkType, data: Vec<u8>) -> Self {
        Self {
            timestamp,
            link,
            data,
        }
    }
}

/// TCP control flags relevant to stream reassembly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TcpFlags {
    pub fin: bool,
    pub syn: bool,
    pub rst: bool,
    pub ack: bool,
}

impl fmt::Display for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut flags = String::with_capacity(4);
        if self.syn {
            flags.push('S');
        }
        if self.ack {
            flags.push('A');
        }
        if self.fin {
            flags.push('F');
        }
        if self.rst {
            flags.push('R');
        }
        if flags.is_empty() {
            flags.push('.');
        }
        write!(f, "{}", flags)
    }
}

/// A parsed TCP segment with its addressing
#[derive(Debug, Clone)]
pub struct TcpSegment {
    /// Direction-specific stream identity
    pub stream: StreamKey,
    /// Sequence number of the first byte (or of the SYN)
    pub seq: u32,
    pub flags: TcpFlags,
    /// Raw option bytes between the fixed header and the payload
    pub options: Vec<u8>,
    pub payload: Vec<u8>,
    /// Capture timestamp of the carrying packet
    pub timestamp: DateTime<Utc>,
}

impl TcpSegment {
    /// Connection key shared by both directions
    pub fn flow_key(&self) -> FlowKey {
        self.stream.flow_key()
    }
}
