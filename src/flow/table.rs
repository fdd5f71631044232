//! Table of connections marked as negotiating SMC
//!
//! Entries are never removed: a connection that advertised SMC once stays
//! tracked for the lifetime of the process.

use std::collections::{HashMap, HashSet};

use crate::core::flow::{FlowKey, NetworkFlow, TransportFlow};

/// Marked connections, grouped by address pair
#[derive(Debug, Default)]
pub struct FlowTable {
    flows: HashMap<NetworkFlow, HashSet<TransportFlow>>,
    /// Number of marked keys across all address pairs
    len: usize,
}

impl FlowTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether a connection has been marked
    pub fn is_tracked(&self, key: &FlowKey) -> bool {
        self.flows
            .get(&key.net)
            .map(|ports| ports.contains(&key.transport))
            .unwrap_or(false)
    }

    /// Mark a connection. Returns true if it was not marked before.
    pub fn mark(&mut self, key: FlowKey) -> bool {
        let inserted = self.flows.entry(key.net).or_default().insert(key.transport);
        if inserted {
            self.len += 1;
        }
        inserted
    }

    /// Number of marked connections
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of distinct address pairs with at least one marked connection
    pub fn network_flows(&self) -> usize {
        self.flows.len()
    }

    /// Iterate over all marked connections
    pub fn iter(&self) -> impl Iterator<Item = FlowKey> + '_ {
        self.flows.iter().flat_map(|(net, ports)| {
            ports.iter().map(move |transport| FlowKey {
                net: *net,
                transport: *transport,
            })
        })
    }
}
