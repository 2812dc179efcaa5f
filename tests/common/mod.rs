//! Shared test infrastructure: an in-memory `NetIf` that forwards segments directly between
//! two `Stack`s without any real socket.

use std::sync::Mutex;

use utcp::wire::{TcpFlags, TcpSegment};
use utcp::{netif::Inbound, NetIf};

#[derive(Default)]
pub struct LoopbackNetIf {
    peer_tx: Mutex<Option<crossbeam_channel::Sender<Inbound>>>,
}

impl LoopbackNetIf {
    pub fn set_peer(&self, tx: crossbeam_channel::Sender<Inbound>) {
        *self.peer_tx.lock().unwrap() = Some(tx);
    }
}

impl NetIf for LoopbackNetIf {
    fn send(&self, src_addr: std::net::Ipv6Addr, dst_addr: std::net::Ipv6Addr, segment: &utcp::wire::TcpSegment) -> std::io::Result<()> {
        if let Some(tx) = self.peer_tx.lock().unwrap().as_ref() {
            let _ = tx.send(Inbound {
                src_addr,
                dst_addr,
                segment: segment.clone(),
            });
        }
        Ok(())
    }
}

/// Stands in for a peer that instantly refuses every connection attempt: any outbound SYN
/// gets an RST bounced straight back into the same stack's inbound queue.
#[derive(Default)]
pub struct RefusingNetIf {
    loopback_tx: Mutex<Option<crossbeam_channel::Sender<Inbound>>>,
}

impl RefusingNetIf {
    pub fn set_self(&self, tx: crossbeam_channel::Sender<Inbound>) {
        *self.loopback_tx.lock().unwrap() = Some(tx);
    }
}

impl NetIf for RefusingNetIf {
    fn send(&self, src_addr: std::net::Ipv6Addr, dst_addr: std::net::Ipv6Addr, segment: &TcpSegment) -> std::io::Result<()> {
        if segment.flags.contains(TcpFlags::SYN) && !segment.flags.contains(TcpFlags::ACK) {
            if let Some(tx) = self.loopback_tx.lock().unwrap().as_ref() {
                let mut rst = TcpSegment::build(segment.dst_port, segment.src_port, Vec::new());
                rst.flags = TcpFlags::RST;
                rst.seq = segment.ack;
                let _ = tx.send(Inbound {
                    src_addr: dst_addr,
                    dst_addr: src_addr,
                    segment: rst,
                });
            }
        }
        Ok(())
    }
}

/// Wires up two `Stack`s, each backed by a `LoopbackNetIf` pointed at the other.
pub fn build_pair(cfg: utcp::Config) -> (utcp::Stack, utcp::Stack) {
    let netif_a = std::sync::Arc::new(LoopbackNetIf::default());
    let netif_b = std::sync::Arc::new(LoopbackNetIf::default());

    let stack_a = utcp::Stack::new(cfg.clone(), netif_a.clone());
    let stack_b = utcp::Stack::new(cfg, netif_b.clone());

    netif_a.set_peer(stack_b.shared.network_tx.clone());
    netif_b.set_peer(stack_a.shared.network_tx.clone());

    (stack_a, stack_b)
}
