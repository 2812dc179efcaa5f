//! The external network-layer collaborator boundary.
//!
//! This engine's scope stops at the TCP segment: outbound segments are handed to a `NetIf`
//! implementation to encapsulate and transmit, and inbound segments arrive already stripped of
//! their IPv6 header. Production code supplies a real tun/raw-socket backed implementation;
//! tests use an in-memory one.

use std::net::Ipv6Addr;

use crate::wire::TcpSegment;

/// A received segment, tagged with the source/destination addresses the caller needs for
/// checksum verification and demultiplexing.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub src_addr: Ipv6Addr,
    pub dst_addr: Ipv6Addr,
    pub segment: TcpSegment,
}

/// The collaborator this engine needs from the network layer below it.
pub trait NetIf: Send + Sync {
    /// Sends `segment` from `src_addr` to `dst_addr`. Errors are logged by the caller and do
    /// not block the FSM; retransmission covers loss.
    fn send(&self, src_addr: Ipv6Addr, dst_addr: Ipv6Addr, segment: &TcpSegment) -> std::io::Result<()>;
}
