//! The finite-state machine: segment-arrival processing and timer-driven transitions.
//! `eventloop.rs` is just the dispatcher that feeds segments and timer firings into this module.
//!
//! Follows RFC 9293 §3.10.7's segment-arrival processing per connection state. A decision here
//! either posts to the waiting call's mailbox, sends a segment through the `NetIf`, or returns a
//! reschedule hint for the caller to arm a timer with — this module itself never touches a clock.

use tracing::{debug, trace, warn};

use crate::buffer_pool::BufferPool;
use crate::ccb::{is_between_wrapped, Ccb, FsmState, State, StatusFlags};
use crate::error::TcpErrorKind;
use crate::mailbox::{ApiEvent, CallResult};
use crate::netif::NetIf;
use crate::wire::{PseudoHeader, TcpFlags, TcpOption, TcpSegment};

/// Computes and fills in `seg`'s checksum against `ccb`'s quad, then hands it to the `NetIf`.
/// A computed checksum of all-zero bits (RFC 793's degenerate case, indistinguishable on the
/// wire from "no checksum present") is refused rather than sent — the peer's own
/// `verify_checksum` would reject it as corrupt anyway, so sending it is pure wasted effort.
fn checksum_and_send(ccb: &Ccb, netif: &dyn NetIf, seg: &mut TcpSegment) {
    let pseudo = PseudoHeader::for_segment(ccb.quad.local.addr(), ccb.quad.remote.addr(), seg.to_bytes().len());
    if let Err(err) = seg.calc_and_set_checksum(&pseudo) {
        warn!(?err, quad = ?ccb.quad, "dropping outgoing segment with degenerate all-zero checksum");
        return;
    }
    if let Err(err) = netif.send(ccb.quad.local.addr(), ccb.quad.remote.addr(), seg) {
        warn!(?err, quad = ?ccb.quad, "failed to send segment");
    }
}

/// Builds and sends a bare control segment (no payload) carrying exactly `flags`, consuming
/// the current `snd.nxt`/`rcv.nxt` as seq/ack. Callers are responsible for including `ACK`
/// themselves wherever RFC 9293 calls for it — the one case that must NOT carry it is the
/// very first SYN of an active open, before any sequence number has been learned from the peer.
fn send_control(ccb: &Ccb, fsm: &mut FsmState, netif: &dyn NetIf, flags: TcpFlags) {
    let mut seg = TcpSegment::build(ccb.quad.local.port(), ccb.quad.remote.port(), Vec::new());
    seg.seq = fsm.snd.nxt;
    seg.ack = fsm.rcv.nxt;
    seg.flags = flags;
    seg.window = fsm.rcv.wnd;
    if flags.contains(TcpFlags::SYN) {
        seg.options.push(TcpOption::MaximumSegmentSize(ccb.cfg.default_mss()));
    }

    checksum_and_send(ccb, netif, &mut seg);
}

/// Notifies whichever API call is currently waiting on this connection, if any.
fn notify(ccb: &Ccb, event: ApiEvent) {
    if let Some(sender) = ccb.waiting_call.lock().unwrap().as_ref() {
        let _ = sender.send(event);
    }
}

fn complete_waiting_call(ccb: &Ccb, result: CallResult) {
    let sender = ccb.waiting_call.lock().unwrap().take();
    if let Some(sender) = sender {
        let _ = sender.send(ApiEvent::Complete(result));
    }
}

/// Active open: send the initial SYN and move to `SYN-SENT`.
pub fn open_active(ccb: &Ccb, netif: &dyn NetIf) {
    let mut fsm = ccb.fsm_lock.lock().unwrap();
    send_control(ccb, &mut fsm, netif, TcpFlags::SYN);
    fsm.snd.nxt = fsm.snd.nxt.wrapping_add(1);
    fsm.state = State::SynSent;
    trace!(quad = ?ccb.quad, "open_active: SYN sent");
}

/// Passive-open SYN processing (RFC 9293 §3.10.7.2, `LISTEN` state): set up the sequence
/// spaces for a freshly-allocated CCB from the inbound SYN and answer with SYN|ACK.
pub fn accept_syn(ccb: &Ccb, netif: &dyn NetIf, seg: TcpSegment) {
    let mut fsm = ccb.fsm_lock.lock().unwrap();
    fsm.rcv.irs = seg.seq;
    fsm.rcv.nxt = seg.seq.wrapping_add(1);
    if let Some(mss) = seg.mss_option() {
        fsm.rcv.wnd = fsm.rcv.wnd.min(mss);
    }
    fsm.state = State::SynRcvd;
    send_control(ccb, &mut fsm, netif, TcpFlags::SYN | TcpFlags::ACK);
    fsm.snd.nxt = fsm.snd.nxt.wrapping_add(1);
}

/// A segment addressed to this CCB has arrived. This is the single entry point
/// RFC 9293 §3.10.7 describes, split by current connection state below.
pub fn on_segment(ccb: &Ccb, netif: &dyn NetIf, pool: &BufferPool, seg: TcpSegment) {
    let mut fsm = ccb.fsm_lock.lock().unwrap();

    if seg.flags.contains(TcpFlags::RST) {
        if fsm.state == State::SynSent {
            // A SYN answered with RST before the handshake ever completed is a refusal, not a
            // reset of an established session: RFC 9293 §3.10.7.3.
            handle_refused(ccb, &mut fsm);
        } else {
            handle_reset(ccb, &mut fsm);
        }
        return;
    }

    match fsm.state {
        State::SynSent => on_segment_syn_sent(ccb, &mut fsm, netif, seg),
        State::Listen => { /* listeners demux before reaching a CCB; unreachable in practice */ }
        _ => on_segment_established_family(ccb, &mut fsm, netif, pool, seg),
    }
}

fn handle_reset(ccb: &Ccb, fsm: &mut FsmState) {
    debug!(quad = ?ccb.quad, state = ?fsm.state, "RST received, aborting connection");
    fsm.state = State::Closed;
    fsm.error = Some(TcpErrorKind::ConnReset);
    complete_waiting_call(ccb, CallResult::Err(std::io::ErrorKind::ConnectionReset, TcpErrorKind::ConnReset));
}

fn handle_refused(ccb: &Ccb, fsm: &mut FsmState) {
    debug!(quad = ?ccb.quad, "RST received in SYN-SENT, connection refused");
    fsm.state = State::Closed;
    fsm.error = Some(TcpErrorKind::ConnRefused);
    complete_waiting_call(ccb, CallResult::Err(std::io::ErrorKind::ConnectionRefused, TcpErrorKind::ConnRefused));
}

/// RFC 9293 §3.10.7.3: segment arrival while in `SYN-SENT`.
fn on_segment_syn_sent(ccb: &Ccb, fsm: &mut FsmState, netif: &dyn NetIf, seg: TcpSegment) {
    if seg.flags.contains(TcpFlags::ACK) {
        let acceptable = is_between_wrapped(fsm.snd.una.wrapping_sub(1), seg.ack, fsm.snd.nxt.wrapping_add(1));
        if !acceptable {
            return; // an unacceptable ACK with no RST is silently dropped, not reset-answered
        }
    }

    if !seg.flags.contains(TcpFlags::SYN) {
        return;
    }

    fsm.rcv.irs = seg.seq;
    fsm.rcv.nxt = seg.seq.wrapping_add(1);
    if let Some(mss) = seg.mss_option() {
        fsm.rcv.wnd = fsm.rcv.wnd.min(mss);
    }
    if seg.flags.contains(TcpFlags::ACK) {
        fsm.snd.una = seg.ack;
    }

    if fsm.snd.una.wrapping_sub(fsm.snd.iss) >= 1 {
        // our SYN is acked: simultaneous open is out of scope, go straight to ESTABLISHED
        fsm.state = State::Established;
        send_control(ccb, fsm, netif, TcpFlags::ACK);
        complete_waiting_call(ccb, CallResult::Ok);
    } else {
        fsm.state = State::SynRcvd;
        send_control(ccb, fsm, netif, TcpFlags::SYN | TcpFlags::ACK);
        fsm.snd.nxt = fsm.snd.nxt.wrapping_add(1);
    }
}

/// Covers every state from `SYN-RCVD` onward: RFC 9293 §3.10.7.4's generic acceptability
/// checks, then the per-state bits for SYN, data, FIN and ACK processing.
fn on_segment_established_family(ccb: &Ccb, fsm: &mut FsmState, netif: &dyn NetIf, pool: &BufferPool, seg: TcpSegment) {
    if !segment_acceptable(fsm, &seg) {
        if !seg.flags.contains(TcpFlags::RST) {
            send_control(ccb, fsm, netif, TcpFlags::ACK);
        }
        return;
    }

    if seg.flags.contains(TcpFlags::SYN) {
        // SYN inside the window after the handshake is a protocol error; RFC 9293 resets.
        send_control(ccb, fsm, netif, TcpFlags::RST);
        fsm.state = State::Closed;
        return;
    }

    if !seg.flags.contains(TcpFlags::ACK) {
        return;
    }

    process_ack(ccb, fsm, netif, &seg);

    if matches!(fsm.state, State::SynRcvd) && fsm.snd.una.wrapping_sub(fsm.snd.iss) >= 1 {
        fsm.state = State::Established;
        let backlog_sender = ccb.accept_backlog.lock().unwrap().take();
        match backlog_sender {
            Some(sender) => {
                let _ = sender.send(ccb.quad);
            }
            None => complete_waiting_call(ccb, CallResult::Accepted(ccb.quad)),
        }
    }

    if !seg.payload.is_empty() && fsm.state.is_readable() {
        accept_payload(ccb, fsm, pool, &seg);
        send_control(ccb, fsm, netif, TcpFlags::ACK);
    }

    if seg.flags.contains(TcpFlags::FIN) {
        process_fin(ccb, fsm, netif);
    }
}

/// RFC 9293 §3.10.7.4 acceptability test over `rcv.nxt .. rcv.nxt + rcv.wnd`.
fn segment_acceptable(fsm: &FsmState, seg: &TcpSegment) -> bool {
    let seg_len = seg.payload.len() as u32 + u32::from(seg.flags.contains(TcpFlags::SYN)) + u32::from(seg.flags.contains(TcpFlags::FIN));
    let window_end = fsm.rcv.nxt.wrapping_add(fsm.rcv.wnd as u32);

    if fsm.rcv.wnd == 0 {
        return seg_len == 0 && seg.seq == fsm.rcv.nxt;
    }
    if seg_len == 0 {
        return seg.seq == fsm.rcv.nxt || is_between_wrapped(fsm.rcv.nxt.wrapping_sub(1), seg.seq, window_end);
    }
    is_between_wrapped(fsm.rcv.nxt.wrapping_sub(1), seg.seq, window_end)
        || is_between_wrapped(fsm.rcv.nxt.wrapping_sub(1), seg.seq.wrapping_add(seg_len - 1), window_end)
}

fn process_ack(ccb: &Ccb, fsm: &mut FsmState, netif: &dyn NetIf, seg: &TcpSegment) {
    if is_between_wrapped(fsm.snd.una.wrapping_sub(1), seg.ack, fsm.snd.nxt.wrapping_add(1)) {
        let newly_acked = seg.ack.wrapping_sub(fsm.snd.una);
        for _ in 0..newly_acked.min(fsm.unacked.len() as u32) {
            fsm.unacked.pop_front();
        }
        fsm.snd.una = seg.ack;
        fsm.snd.wnd = seg.window;

        if let Some(inflight) = fsm.retransmit.inflight() {
            if seg.ack == inflight.seq_hi {
                if inflight.retries == 0 {
                    fsm.retransmit.sample_rtt(inflight.sent_at.elapsed());
                }
                fsm.retransmit.clear();
            }
            // a partial ack covering less than the whole in-flight range just keeps waiting
        }

        if fsm.unacked.is_empty() {
            fsm.status.remove(StatusFlags::FIN_SENT);
        }

        notify(ccb, ApiEvent::NotifyUser); // window may have opened for a blocked `send`
        maybe_transmit(ccb, fsm, netif);
    }

    advance_close_on_ack(ccb, fsm, seg);
}

/// Enqueues `data` for transmission and sends as much of it as the window currently allows
/// — on every ACK, first try to send newly queued data before resending anything in flight.
pub fn send_data(ccb: &Ccb, netif: &dyn NetIf, data: &[u8]) -> Result<usize, std::io::Error> {
    let mut fsm = ccb.fsm_lock.lock().unwrap();
    if !fsm.state.is_writable() {
        return Err(crate::error::tcp_error(TcpErrorKind::NotConnected));
    }
    fsm.unacked.extend(data.iter().copied());
    maybe_transmit(ccb, &mut fsm, netif);
    Ok(data.len())
}

/// Sends new data out of `unacked` when nothing is currently in flight and the peer's window
/// allows it. A no-op otherwise: retransmission of an in-flight region is handled separately by
/// [`on_retransmit_timeout`].
fn maybe_transmit(ccb: &Ccb, fsm: &mut FsmState, netif: &dyn NetIf) {
    if fsm.retransmit.inflight().is_some() {
        return;
    }
    let sent_unacked = fsm.snd.nxt.wrapping_sub(fsm.snd.una) as usize;
    let available = fsm.unacked.len().saturating_sub(sent_unacked);
    if available == 0 {
        return;
    }
    let window = fsm.snd.wnd as usize;
    if window <= sent_unacked {
        return; // no room left in the peer's window
    }
    let can_send = available.min(window - sent_unacked).min(ccb.cfg.default_mss() as usize);
    if can_send == 0 {
        return;
    }

    let bytes: Vec<u8> = fsm.unacked.iter().skip(sent_unacked).take(can_send).copied().collect();
    let seq = fsm.snd.nxt;
    let mut seg = TcpSegment::build(ccb.quad.local.port(), ccb.quad.remote.port(), bytes);
    seg.seq = seq;
    seg.ack = fsm.rcv.nxt;
    seg.flags = TcpFlags::ACK | TcpFlags::PSH;
    seg.window = fsm.rcv.wnd;
    checksum_and_send(ccb, netif, &mut seg);

    fsm.snd.nxt = fsm.snd.nxt.wrapping_add(can_send as u32);
    fsm.retransmit.mark_sent(seq, fsm.snd.nxt, 0);
}

fn advance_close_on_ack(ccb: &Ccb, fsm: &mut FsmState, seg: &TcpSegment) {
    // `unacked` only holds user data bytes, not the FIN's own sequence number, so only
    // `snd.una == snd.nxt` (equivalently `seg.ack == snd.nxt`) proves the FIN itself was acked.
    match fsm.state {
        State::FinWait1 if seg.ack == fsm.snd.nxt => {
            fsm.state = State::FinWait2;
        }
        State::Closing if seg.ack == fsm.snd.nxt => {
            fsm.state = State::TimeWait;
            complete_waiting_call(ccb, CallResult::Ok);
        }
        State::LastAck if seg.ack == fsm.snd.nxt => {
            fsm.state = State::Closed;
            complete_waiting_call(ccb, CallResult::Ok);
        }
        _ => {}
    }
}

fn accept_payload(ccb: &Ccb, fsm: &mut FsmState, pool: &BufferPool, seg: &TcpSegment) {
    if seg.seq != fsm.rcv.nxt {
        return; // out-of-order data beyond the contiguous region is dropped, not reassembled
    }
    let written = pool.ring_write(ccb.recv_buffer, fsm.recv_read, &mut fsm.recv_fill, &seg.payload);
    fsm.rcv.nxt = fsm.rcv.nxt.wrapping_add(written as u32);
    let buffered = fsm.recv_fill - fsm.recv_read;
    fsm.rcv.wnd = pool.capacity().saturating_sub(buffered).min(u16::MAX as usize) as u16;
    notify(ccb, ApiEvent::NotifyUser);
}

fn process_fin(ccb: &Ccb, fsm: &mut FsmState, netif: &dyn NetIf) {
    fsm.rcv.nxt = fsm.rcv.nxt.wrapping_add(1);
    send_control(ccb, fsm, netif, TcpFlags::ACK);
    notify(ccb, ApiEvent::NotifyUser);

    fsm.state = match fsm.state {
        State::Established => State::CloseWait,
        State::FinWait1 => State::Closing,
        State::FinWait2 => {
            complete_waiting_call(ccb, CallResult::Ok);
            State::TimeWait
        }
        other => other,
    };
}

/// Send our FIN if none is outstanding yet and move to the appropriate state.
pub fn close(ccb: &Ccb, netif: &dyn NetIf) {
    let mut fsm = ccb.fsm_lock.lock().unwrap();
    if fsm.status.contains(StatusFlags::FIN_SENT) {
        return;
    }
    send_control(ccb, &mut fsm, netif, TcpFlags::FIN | TcpFlags::ACK);
    fsm.snd.nxt = fsm.snd.nxt.wrapping_add(1);
    fsm.status.insert(StatusFlags::FIN_SENT);

    fsm.state = match fsm.state {
        State::Established => State::FinWait1,
        State::CloseWait => State::LastAck,
        other => other,
    };
}

/// Send RST unconditionally and tear down immediately.
pub fn abort(ccb: &Ccb, netif: &dyn NetIf) {
    let mut fsm = ccb.fsm_lock.lock().unwrap();
    send_control(ccb, &mut fsm, netif, TcpFlags::RST);
    fsm.state = State::Closed;
    fsm.error = Some(TcpErrorKind::ConnAborted);
    complete_waiting_call(ccb, CallResult::Err(std::io::ErrorKind::ConnectionAborted, TcpErrorKind::ConnAborted));
}

/// The retransmit timer fired: resend the oldest unacked region and back off the RTO.
///
/// Returns the delay to wait before the next retransmit if the region is still outstanding
/// afterward (the caller re-arms the timer), or `None` once there is nothing left in flight.
pub fn on_retransmit_timeout(ccb: &Ccb, netif: &dyn NetIf) -> Option<std::time::Duration> {
    let mut fsm = ccb.fsm_lock.lock().unwrap();
    let Some(mut inflight) = fsm.retransmit.inflight() else {
        return None;
    };
    fsm.retransmit.back_off();
    inflight.retries += 1;

    let offset = inflight.seq_lo.wrapping_sub(fsm.snd.una) as usize;
    let len = inflight.seq_hi.wrapping_sub(inflight.seq_lo) as usize;
    let bytes: Vec<u8> = fsm.unacked.iter().skip(offset).take(len).copied().collect();
    let mut seg = TcpSegment::build(ccb.quad.local.port(), ccb.quad.remote.port(), bytes);
    seg.seq = inflight.seq_lo;
    seg.ack = fsm.rcv.nxt;
    seg.flags = TcpFlags::ACK;
    seg.window = fsm.rcv.wnd;
    checksum_and_send(ccb, netif, &mut seg);

    fsm.retransmit.mark_sent(inflight.seq_lo, inflight.seq_hi, inflight.retries);
    Some(fsm.retransmit.current_rto())
}

/// `SEND_PROBE`: zero-window probing, RFC 9293 §3.8.6.1, with exponential backoff clamped to
/// `[probe_lower_bound, probe_upper_bound]`.
///
/// Returns the next probe delay if the window is still closed, or `None` once it has opened
/// (the caller stops re-arming the probe timer).
pub fn on_probe_timeout(ccb: &Ccb, netif: &dyn NetIf) -> Option<std::time::Duration> {
    let mut fsm = ccb.fsm_lock.lock().unwrap();
    if fsm.snd.wnd != 0 {
        return None; // window opened since the probe was scheduled
    }
    let probe_byte = fsm.unacked.front().copied();
    let mut seg = TcpSegment::build(
        ccb.quad.local.port(),
        ccb.quad.remote.port(),
        probe_byte.map(|b| vec![b]).unwrap_or_default(),
    );
    seg.seq = fsm.snd.una;
    seg.ack = fsm.rcv.nxt;
    seg.flags = TcpFlags::ACK;
    seg.window = fsm.rcv.wnd;
    checksum_and_send(ccb, netif, &mut seg);

    fsm.probe_backoff = (fsm.probe_backoff * 2).min(ccb.cfg.probe_upper_bound).max(ccb.cfg.probe_lower_bound);
    Some(fsm.probe_backoff)
}

/// The TIME-WAIT timer fired: the 2*MSL quiet time has elapsed; the CCB may now be reclaimed.
pub fn on_timewait_timeout(ccb: &Ccb) -> bool {
    let mut fsm = ccb.fsm_lock.lock().unwrap();
    if fsm.state == State::TimeWait {
        fsm.state = State::Closed;
        true
    } else {
        false
    }
}

/// What the caller should do after a connection-timer firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionTimerOutcome {
    /// Nothing to do: either the timer was stale (already-synchronized CCB), or a blocked
    /// call was just failed and will reclaim the CCB itself once it wakes.
    Noop,
    /// Still retrying; re-arm the connection timer for `Duration` more.
    Reschedule(std::time::Duration),
    /// Torn down with nobody left waiting on it; the caller must reclaim the CCB now.
    Reclaim,
}

/// The connection timer fired.
///
/// For an active open still short of `ESTABLISHED`, this is `Config::connection_timeout`
/// expiring with no progress: deliver an error to whichever call is waiting without disturbing
/// already-synchronized state.
///
/// For a passively-opened `SYN-RCVD` CCB this is the SYN+ACK retry timer instead (RFC 9293
/// §3.10.7.2): resend `SYN+ACK` while `syn_retries_remaining` allows it, otherwise tear the CCB
/// down so a fresh SYN for the same quad starts over cleanly, as if the listener had never seen
/// this attempt (`LISTEN_REOPEN`).
pub fn on_connection_timeout(ccb: &Ccb, netif: &dyn NetIf) -> ConnectionTimerOutcome {
    let mut fsm = ccb.fsm_lock.lock().unwrap();

    if fsm.state == State::SynRcvd && fsm.status.contains(StatusFlags::PASSIVE) {
        if fsm.syn_retries_remaining == 0 {
            debug!(quad = ?ccb.quad, "SYN-RCVD retry budget exhausted, reopening listener slot");
            fsm.state = State::Closed;
            return ConnectionTimerOutcome::Reclaim;
        }
        fsm.syn_retries_remaining -= 1;
        fsm.snd.nxt = fsm.snd.una;
        send_control(ccb, &mut fsm, netif, TcpFlags::SYN | TcpFlags::ACK);
        fsm.snd.nxt = fsm.snd.nxt.wrapping_add(1);
        return ConnectionTimerOutcome::Reschedule(ccb.cfg.rto_min);
    }

    if fsm.state.is_synchronized() {
        return ConnectionTimerOutcome::Noop; // stale firing against an already-established CCB
    }
    fsm.state = State::Closed;
    fsm.error = Some(TcpErrorKind::TimedOut);
    complete_waiting_call(ccb, CallResult::Err(std::io::ErrorKind::TimedOut, TcpErrorKind::TimedOut));
    ConnectionTimerOutcome::Noop // the blocked `connect` call reclaims once it wakes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_pool::BufferPool;
    use crate::ccb::Quad;
    use crate::config::Config;
    use crate::endpoint::Endpoint;
    use crate::netif::mock::RecordingNetIf;
    use std::net::Ipv6Addr;

    fn quad() -> Quad {
        Quad {
            local: Endpoint::new(Ipv6Addr::LOCALHOST, 1000),
            remote: Endpoint::new(Ipv6Addr::LOCALHOST, 2000),
        }
    }

    #[test]
    fn open_active_sends_syn_and_moves_to_syn_sent() {
        let pool = BufferPool::new(1, 64);
        let handle = pool.get().unwrap();
        let ccb = Ccb::new(quad(), Config::default(), handle, 100, State::Closed);
        let netif = RecordingNetIf::default();

        open_active(&ccb, &netif);

        assert_eq!(ccb.fsm_lock.lock().unwrap().state, State::SynSent);
        let sent = netif.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].2.flags.contains(TcpFlags::SYN));
    }

    #[test]
    fn syn_ack_completes_active_open() {
        let pool = BufferPool::new(1, 64);
        let handle = pool.get().unwrap();
        let ccb = Ccb::new(quad(), Config::default(), handle, 100, State::Closed);
        let netif = RecordingNetIf::default();
        open_active(&ccb, &netif);

        let mut synack = TcpSegment::build(2000, 1000, Vec::new());
        synack.flags = TcpFlags::SYN | TcpFlags::ACK;
        synack.seq = 500;
        synack.ack = 101;
        synack.window = 4096;

        on_segment(&ccb, &netif, &pool, synack);

        assert_eq!(ccb.fsm_lock.lock().unwrap().state, State::Established);
    }

    #[test]
    fn rst_aborts_the_connection() {
        let pool = BufferPool::new(1, 64);
        let handle = pool.get().unwrap();
        let ccb = Ccb::new(quad(), Config::default(), handle, 100, State::Established);
        let netif = RecordingNetIf::default();

        let mut rst = TcpSegment::build(2000, 1000, Vec::new());
        rst.flags = TcpFlags::RST;
        rst.seq = ccb.fsm_lock.lock().unwrap().rcv.nxt;

        on_segment(&ccb, &netif, &pool, rst);
        assert_eq!(ccb.fsm_lock.lock().unwrap().state, State::Closed);
    }

    #[test]
    fn rst_in_syn_sent_is_reported_as_connection_refused() {
        let pool = BufferPool::new(1, 64);
        let handle = pool.get().unwrap();
        let ccb = Ccb::new(quad(), Config::default(), handle, 100, State::Closed);
        let netif = RecordingNetIf::default();
        open_active(&ccb, &netif);

        let (tx, rx) = crate::mailbox::mailbox(4);
        *ccb.waiting_call.lock().unwrap() = Some(tx);

        let mut rst = TcpSegment::build(2000, 1000, Vec::new());
        rst.flags = TcpFlags::RST;

        on_segment(&ccb, &netif, &pool, rst);

        assert_eq!(ccb.fsm_lock.lock().unwrap().state, State::Closed);
        match rx.recv().unwrap() {
            ApiEvent::Complete(CallResult::Err(kind, tcp_kind)) => {
                assert_eq!(kind, std::io::ErrorKind::ConnectionRefused);
                assert_eq!(tcp_kind, TcpErrorKind::ConnRefused);
            }
            other => panic!("expected a refused-connection error, got {other:?}"),
        }
    }

    #[test]
    fn retransmit_timeout_resends_only_the_inflight_range() {
        let pool = BufferPool::new(1, 64);
        let handle = pool.get().unwrap();
        let ccb = Ccb::new(quad(), Config::default(), handle, 100, State::Established);
        ccb.fsm_lock.lock().unwrap().snd.wnd = 4096;
        let netif = RecordingNetIf::default();

        send_data(&ccb, &netif, b"hello").unwrap();
        assert_eq!(netif.sent.lock().unwrap().len(), 1);

        let next_rto = on_retransmit_timeout(&ccb, &netif);
        assert!(next_rto.is_some());

        let sent = netif.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].2.payload, b"hello");
        assert_eq!(
            ccb.fsm_lock.lock().unwrap().retransmit.inflight().unwrap().retries,
            1
        );
    }

    #[test]
    fn probe_timeout_sends_a_single_byte_while_the_window_stays_shut() {
        let pool = BufferPool::new(1, 64);
        let handle = pool.get().unwrap();
        let ccb = Ccb::new(quad(), Config::default(), handle, 100, State::Established);
        {
            let mut fsm = ccb.fsm_lock.lock().unwrap();
            fsm.snd.wnd = 0;
            fsm.unacked.extend(b"x".iter().copied());
        }
        let netif = RecordingNetIf::default();

        let next = on_probe_timeout(&ccb, &netif);
        assert!(next.is_some());
        let sent = netif.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].2.payload, b"x");
        drop(sent);

        // Once the peer reopens the window, the next probe is a no-op.
        ccb.fsm_lock.lock().unwrap().snd.wnd = 4096;
        assert!(on_probe_timeout(&ccb, &netif).is_none());
    }

    #[test]
    fn connection_timeout_is_ignored_once_established() {
        let pool = BufferPool::new(1, 64);
        let handle = pool.get().unwrap();
        let ccb = Ccb::new(quad(), Config::default(), handle, 100, State::Established);
        let netif = RecordingNetIf::default();

        let outcome = on_connection_timeout(&ccb, &netif);

        assert_eq!(outcome, ConnectionTimerOutcome::Noop);
        assert_eq!(ccb.fsm_lock.lock().unwrap().state, State::Established);
    }

    #[test]
    fn syn_rcvd_retries_syn_ack_then_gives_up() {
        let pool = BufferPool::new(1, 64);
        let handle = pool.get().unwrap();
        let ccb = Ccb::new(quad(), Config::default(), handle, 100, State::Listen);
        let netif = RecordingNetIf::default();

        let mut syn = TcpSegment::build(2000, 1000, Vec::new());
        syn.flags = TcpFlags::SYN;
        syn.seq = 500;
        accept_syn(&ccb, &netif, syn);
        ccb.fsm_lock.lock().unwrap().status.insert(StatusFlags::PASSIVE);

        let remaining = ccb.fsm_lock.lock().unwrap().syn_retries_remaining;
        for _ in 0..remaining {
            let outcome = on_connection_timeout(&ccb, &netif);
            assert!(matches!(outcome, ConnectionTimerOutcome::Reschedule(_)));
            assert_eq!(ccb.fsm_lock.lock().unwrap().state, State::SynRcvd);
        }

        // SYN+ACK retried once per exhausted attempt, plus the original from `accept_syn`.
        assert_eq!(netif.sent.lock().unwrap().len(), remaining + 1);

        let outcome = on_connection_timeout(&ccb, &netif);
        assert_eq!(outcome, ConnectionTimerOutcome::Reclaim);
        assert_eq!(ccb.fsm_lock.lock().unwrap().state, State::Closed);
    }
}
