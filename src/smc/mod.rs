//! SMC handshake wire formats
//!
//! SMC-R/SMC-D connections start life as plain TCP. The client advertises
//! SMC capability with an experimental TCP option during the three-way
//! handshake, then both sides exchange CLC (connection layer control)
//! messages over the established TCP stream. Both carry the same
//! eyecatcher, EBCDIC "SMCR".

pub mod clc;
pub mod option;

pub use clc::{ClcHeader, ClcMessageType, CLC_HEADER_LEN};
pub use option::has_smc_option;

/// EBCDIC "SMCR"
pub const SMC_EYECATCHER: [u8; 4] = [0xE2, 0xD4, 0xC3, 0xD9];
