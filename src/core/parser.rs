//! Packet parsing
//!
//! Slices a captured packet with etherparse and keeps only what the capture
//! loop needs from TCP-over-IP traffic. Everything else is reported as a
//! `PacketError` so the caller can count and skip it.

use std::net::IpAddr;

use etherparse::{NetSlice, SlicedPacket, TransportSlice};

use crate::error::PacketError;
use super::flow::{NetworkFlow, StreamKey, TransportFlow};
use super::packet::{LinkType, RawPacket, TcpFlags, TcpSegment};

/// Parse a captured packet into a TCP segment
pub fn parse_tcp_segment(raw: &RawPacket) -> Result<TcpSegment, PacketError> {
    let sliced = match raw.link {
        LinkType::Ethernet => SlicedPacket::from_ethernet(&raw.data),
        LinkType::RawIp => SlicedPacket::from_ip(&raw.data),
        LinkType::LinuxSll => SlicedPacket::from_linux_sll(&raw.data),
        LinkType::Other(_) => return Err(PacketError::UnsupportedLink(raw.link)),
    }
    .map_err(|e| PacketError::ParseError(e.to_string()))?;

    let net = parse_network_flow(&sliced).ok_or(PacketError::NoIpLayer)?;

    let tcp = match &sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => tcp,
        _ => return Err(PacketError::NotTcp),
    };

    Ok(TcpSegment {
        stream: StreamKey::new(
            net,
            TransportFlow::new(tcp.source_port(), tcp.destination_port()),
        ),
        seq: tcp.sequence_number(),
        flags: TcpFlags {
            fin: tcp.fin(),
            syn: tcp.syn(),
            rst: tcp.rst(),
            ack: tcp.ack(),
        },
        options: tcp.options().to_vec(),
        payload: tcp.payload().to_vec(),
        timestamp: raw.timestamp,
    })
}

/// Address pair of the IP layer, `None` for non-IP packets (ARP, etc.)
fn parse_network_flow(sliced: &SlicedPacket<'_>) -> Option<NetworkFlow> {
    match &sliced.net {
        Some(NetSlice::Ipv4(ipv4)) => {
            let header = ipv4.header();
            Some(NetworkFlow::new(
                IpAddr::from(header.source_addr()),
                IpAddr::from(header.destination_addr()),
            ))
        }
        Some(NetSlice::Ipv6(ipv6)) => {
            let header = ipv6.header();
            Some(NetworkFlow::new(
                IpAddr::from(header.source_addr()),
                IpAddr::from(header.destination_addr()),
            ))
        }
        _ => None,
    }
}
