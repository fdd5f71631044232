//! Flow tracking
//!
//! Remembers which connections have advertised SMC so that every later
//! segment of those connections reaches reassembly, including the pure ACKs
//! and data segments that no longer carry the option.
//!
//! # Example
//!
//! ```ignore
//! use smcsniff::flow::FlowTracker;
//!
//! let mut tracker = FlowTracker::new();
//!
//! // Decide whether a segment goes to reassembly
//! let decision = tracker.process(&segment);
//! if decision.is_forward() {
//!     reassembler.assemble(&segment);
//! }
//! ```

pub mod table;
pub mod tracker;

pub use table::FlowTable;
pub use tracker::{FlowTracker, ForwardDecision};

/// Flow tracking statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerStats {
    /// TCP segments seen
    pub segments_seen: u64,
    /// Segments carrying the SMC option
    pub marker_segments: u64,
    /// Segments handed to reassembly
    pub segments_forwarded: u64,
    /// Connections currently marked
    pub tracked_flows: usize,
}
