//! Flow tracker - forwarding decisions for captured segments
//!
//! A segment is forwarded to reassembly when it carries the SMC option or
//! when its connection was marked earlier. Seeing the option marks the
//! connection before the segment is forwarded.

use tracing::debug;

use crate::core::flow::FlowKey;
use crate::core::packet::TcpSegment;
use crate::smc::has_smc_option;
use super::table::FlowTable;
use super::TrackerStats;

/// Outcome of running a segment through the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardDecision {
    /// Segment carried the option and its connection was not marked yet
    NewlyMarked,
    /// Segment carried the option, connection already marked
    Marked,
    /// No option, but the connection is tracked
    Tracked,
    /// Not part of an SMC connection
    Skip,
}

impl ForwardDecision {
    pub fn is_forward(&self) -> bool {
        !matches!(self, ForwardDecision::Skip)
    }
}

/// Sticky SMC flow tracker, owned by the capture loop
#[derive(Debug, Default)]
pub struct FlowTracker {
    table: FlowTable,
    stats: TrackerStats,
}

impl FlowTracker {
    /// Create a tracker with an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether a segment goes to reassembly, marking its connection
    /// when it carries the SMC option
    pub fn process(&mut self, segment: &TcpSegment) -> ForwardDecision {
        self.stats.segments_seen += 1;

        let key = segment.flow_key();
        let decision = self.decide(key, has_smc_option(&segment.options));

        match decision {
            ForwardDecision::NewlyMarked => {
                debug!("SMC option seen, tracking {}", key);
                self.stats.marker_segments += 1;
            }
            ForwardDecision::Marked => self.stats.marker_segments += 1,
            _ => {}
        }
        if decision.is_forward() {
            self.stats.segments_forwarded += 1;
        }
        self.stats.tracked_flows = self.table.len();

        decision
    }

    /// Forwarding rule: `has_marker || is_tracked(key)`, with `mark(key)`
    /// applied first when the marker is present
    pub fn decide(&mut self, key: FlowKey, has_marker: bool) -> ForwardDecision {
        if has_marker {
            if self.table.mark(key) {
                ForwardDecision::NewlyMarked
            } else {
                ForwardDecision::Marked
            }
        } else if self.table.is_tracked(&key) {
            ForwardDecision::Tracked
        } else {
            ForwardDecision::Skip
        }
    }

    pub fn is_tracked(&self, key: &FlowKey) -> bool {
        self.table.is_tracked(key)
    }

    /// Get the underlying table
    pub fn table(&self) -> &FlowTable {
        &self.table
    }

    /// Get tracker statistics
    pub fn stats(&self) -> &TrackerStats {
        &self.stats
    }
}
