//! Connection flow identifiers
//!
//! A captured segment carries two flows: the network flow (address pair) and
//! the transport flow (port pair). Together they identify one direction of a
//! connection (`StreamKey`) or, once normalized, the connection itself
//! (`FlowKey`).

use std::fmt;
use std::net::IpAddr;

/// Pair of endpoint addresses, oriented source -> destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetworkFlow {
    pub src: IpAddr,
    pub dst: IpAddr,
}

impl NetworkFlow {
    pub fn new(src: IpAddr, dst: IpAddr) -> Self {
        Self { src, dst }
    }

    /// Same flow seen from the other side
    pub fn reverse(&self) -> Self {
        Self {
            src: self.dst,
            dst: self.src,
        }
    }
}

impl fmt::Display for NetworkFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.src, self.dst)
    }
}

/// Pair of endpoint ports, oriented source -> destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportFlow {
    pub src: u16,
    pub dst: u16,
}

impl TransportFlow {
    pub fn new(src: u16, dst: u16) -> Self {
        Self { src, dst }
    }

    pub fn reverse(&self) -> Self {
        Self {
            src: self.dst,
            dst: self.src,
        }
    }
}

impl fmt::Display for TransportFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.src, self.dst)
    }
}

/// One direction of a TCP connection, as the sender sees it.
///
/// Reassembly produces one byte stream per `StreamKey`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub net: NetworkFlow,
    pub transport: TransportFlow,
}

impl StreamKey {
    pub fn new(net: NetworkFlow, transport: TransportFlow) -> Self {
        Self { net, transport }
    }

    /// The opposite direction of the same connection
    pub fn reverse(&self) -> Self {
        Self {
            net: self.net.reverse(),
            transport: self.transport.reverse(),
        }
    }

    /// Direction-independent key of the connection this stream belongs to
    pub fn flow_key(&self) -> FlowKey {
        FlowKey::new(self.net, self.transport)
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}",
            Endpoint(self.net.src, self.transport.src),
            Endpoint(self.net.dst, self.transport.dst)
        )
    }
}

/// Unique key identifying a connection (normalized so the lower endpoint is
/// always the source)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub net: NetworkFlow,
    pub transport: TransportFlow,
}

impl FlowKey {
    /// Build the canonical key from either direction of a connection.
    ///
    /// Address and port are swapped together, so `(a:p -> b:q)` and
    /// `(b:q -> a:p)` produce the same key.
    pub fn new(net: NetworkFlow, transport: TransportFlow) -> Self {
        if (net.src, transport.src) <= (net.dst, transport.dst) {
            Self { net, transport }
        } else {
            Self {
                net: net.reverse(),
                transport: transport.reverse(),
            }
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} <-> {}",
            Endpoint(self.net.src, self.transport.src),
            Endpoint(self.net.dst, self.transport.dst)
        )
    }
}

/// `addr:port`, with brackets around IPv6 addresses
struct Endpoint(IpAddr, u16);

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            IpAddr::V4(addr) => write!(f, "{}:{}", addr, self.1),
            IpAddr::V6(addr) => write!(f, "[{}]:{}", addr, self.1),
        }
    }
}
