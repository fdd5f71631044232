//! Core shared types for packet processing
//!
//! - `packet`: captured packets and parsed TCP segments
//! - `flow`: network/transport flows, stream and connection keys
//! - `parser`: etherparse-based segment extraction

pub mod flow;
pub mod packet;
pub mod parser;

pub use flow::{FlowKey, NetworkFlow, StreamKey, TransportFlow};
pub use packet::{LinkType, RawPacket, TcpFlags, TcpSegment};
pub use parser::parse_tcp_segment;
