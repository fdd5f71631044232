//! Passive SMC handshake sniffer
//!
//! Watches TCP traffic for connections that negotiate SMC (the TCP option
//! kind 254 carrying the `E2 D4 C3 D9` eyecatcher), reassembles their byte
//! streams and reports the CLC header each side sends first.
//!
//! The pipeline is driven by [`engine::run`]:
//!
//! - [`engine::capture`] reads packets from an interface or a pcap file
//! - [`core::parser`] extracts TCP segments
//! - [`flow::FlowTracker`] decides which segments belong to SMC connections
//! - [`reassembly::Reassembler`] rebuilds each direction into a stream
//! - [`engine::decoder::FlowDecoder`] parses the header off every stream

pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod flow;
pub mod reassembly;
pub mod smc;

pub use config::Config;
pub use engine::{run, CaptureLoop, HandshakeReport, PacketSource, RunSummary};
pub use error::{PacketError, Result, SnifferError};
