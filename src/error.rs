use thiserror::Error;

use crate::core::LinkType;

#[derive(Debug, Error)]
pub enum SnifferError {
    #[error("failed to open capture on {source_name}: {reason}")]
    CaptureOpen { source_name: String, reason: String },

    #[error("capture source failed: {0}")]
    CaptureRead(String),

    #[error("live capture support not compiled in (enable the `live` feature)")]
    LiveCaptureUnavailable,

    #[error("config error: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, SnifferError>;

/// Why a captured packet was not turned into a TCP segment.
///
/// None of these are fatal; the capture loop counts them and moves on.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("packet parse error: {0}")]
    ParseError(String),

    #[error("unsupported link type {0}")]
    UnsupportedLink(LinkType),

    #[error("no IP layer found in packet")]
    NoIpLayer,

    #[error("no TCP layer found in packet")]
    NotTcp,
}
