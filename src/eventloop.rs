//! The single dedicated protocol thread: multiplexes inbound segments and timer expirations
//! onto the FSM via `crossbeam_channel::Select`.
//!
//! Exactly two channels are shared by every connection — one for inbound segments, one for
//! timer expiries — so `Select`'s operand set stays fixed regardless of connection count.

use tracing::{trace, warn};

use crate::fsm;
use crate::stack::Shared;
use crate::timer::TimerKind;

/// Runs until both the inbound-segment and timer channels are disconnected, i.e. until the
/// owning [`crate::stack::Stack`] is dropped.
pub fn run(shared: std::sync::Arc<Shared>) {
    let network_rx = shared.network_rx.clone();
    let timer_rx = shared.timer_rx.clone();

    loop {
        let mut select = crossbeam_channel::Select::new();
        let net_idx = select.recv(&network_rx);
        let timer_idx = select.recv(&timer_rx);

        let op = select.select();
        match op.index() {
            i if i == net_idx => match op.recv(&network_rx) {
                Ok(inbound) => dispatch_segment(&shared, inbound),
                Err(_) => return,
            },
            i if i == timer_idx => match op.recv(&timer_rx) {
                Ok(expired) => dispatch_timer(&shared, expired),
                Err(_) => return,
            },
            _ => unreachable!("Select only registered two operands"),
        }
    }
}

fn dispatch_segment(shared: &Shared, inbound: crate::netif::Inbound) {
    let quad = crate::endpoint::Quad {
        local: crate::endpoint::Endpoint::new(inbound.dst_addr, inbound.segment.dst_port),
        remote: crate::endpoint::Endpoint::new(inbound.src_addr, inbound.segment.src_port),
    };

    let pseudo = crate::wire::PseudoHeader::for_segment(inbound.dst_addr, inbound.src_addr, inbound.segment.to_bytes().len());
    if !inbound.segment.verify_checksum(&pseudo) {
        warn!(?quad, "dropping segment with bad checksum");
        return;
    }

    if let Some(ccb) = shared.find_connection(&quad) {
        trace!(?quad, flags = ?inbound.segment.flags, "dispatching to existing connection");
        fsm::on_segment(&ccb, shared.netif.as_ref(), &shared.buffer_pool, inbound.segment);
        shared.ensure_retransmit_timer(&ccb);
        shared.ensure_probe_timer(&ccb);
        shared.ensure_timewait_timer(&ccb);
        return;
    }

    shared.try_accept(quad, inbound.segment);
}

fn dispatch_timer(shared: &Shared, expired: crate::timer::TimerExpired) {
    let Some(ccb) = shared.find_connection(&expired.conn) else {
        return;
    };
    match expired.kind {
        TimerKind::Retransmit => {
            let next = fsm::on_retransmit_timeout(&ccb, shared.netif.as_ref());
            shared.reschedule_retransmit_timer(&ccb, next);
        }
        TimerKind::ZeroWindowProbe => {
            let next = fsm::on_probe_timeout(&ccb, shared.netif.as_ref());
            shared.reschedule_probe_timer(&ccb, next);
        }
        TimerKind::Connection => match fsm::on_connection_timeout(&ccb, shared.netif.as_ref()) {
            fsm::ConnectionTimerOutcome::Reschedule(delay) => shared.reschedule_connection_timer(&ccb, Some(delay)),
            fsm::ConnectionTimerOutcome::Reclaim => {
                shared.reschedule_connection_timer(&ccb, None);
                shared.reclaim(&expired.conn);
            }
            fsm::ConnectionTimerOutcome::Noop => shared.reschedule_connection_timer(&ccb, None),
        },
        TimerKind::TimeWait => {
            if fsm::on_timewait_timeout(&ccb) {
                shared.reclaim(&expired.conn);
            }
        }
    }
}
