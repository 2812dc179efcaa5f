//! Blocking public API: `connect`, `listen`/`accept`, `send`, `recv`, `close`, `abort`.
//!
//! Each call acquires the target CCB's `function_lock` for its whole duration — the "dual
//! lock" model: only one API call is ever in flight per connection, while the event loop still
//! freely touches `fsm_lock` underneath it to process arriving segments and timers.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::ccb::{Ccb, Quad, State};
use crate::endpoint::Endpoint;
use crate::error::{tcp_error, TcpErrorKind};
use crate::fsm;
use crate::mailbox::{self, ApiEvent, CallResult};
use crate::stack::{Listener, Stack};
use crate::timer::TimerKind;

/// A connected endpoint. Returned by [`connect`] and [`accept`].
pub struct TcpStream {
    stack: Arc<crate::stack::Shared>,
    ccb: Arc<Ccb>,
}

impl TcpStream {
    pub fn quad(&self) -> Quad {
        self.ccb.quad
    }

    pub fn send(&self, data: &[u8]) -> std::io::Result<usize> {
        send(&self.stack, &self.ccb, data)
    }

    pub fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        recv(&self.stack, &self.ccb, buf, None)
    }

    /// As [`Self::recv`], but gives up with `TimedOut` after `timeout` elapses with nothing to
    /// read. The connection is left untouched by a timeout: it remains `ESTABLISHED` (or
    /// whatever readable state it was already in) and a later call may still succeed.
    pub fn recv_timeout(&self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        recv(&self.stack, &self.ccb, buf, Some(timeout))
    }

    pub fn close(&self) -> std::io::Result<()> {
        close(&self.stack, &self.ccb)
    }

    pub fn abort(&self) -> std::io::Result<()> {
        abort(&self.stack, &self.ccb)
    }
}

/// Active open: sends the initial SYN and blocks until the handshake resolves.
pub fn connect(stack: &Stack, local: Endpoint, remote: Endpoint) -> std::io::Result<TcpStream> {
    let shared = stack.shared.clone();
    let quad = Quad { local, remote };

    let handle = shared.buffer_pool.get().ok_or_else(|| tcp_error(TcpErrorKind::NoMemory))?;
    let ccb = Ccb::new(quad, shared.cfg.clone(), handle, stack.next_iss(), State::Closed);
    stack.register_connection(ccb.clone());

    let _function_guard = ccb.function_lock.lock().unwrap();
    let (tx, rx) = mailbox::mailbox(shared.cfg.mailbox_capacity());
    *ccb.waiting_call.lock().unwrap() = Some(tx);

    let timeout_handle = shared.timer.schedule(shared.cfg.connection_timeout, quad, TimerKind::Connection, shared.timer_tx.clone());
    ccb.fsm_lock.lock().unwrap().connection_timer = Some(timeout_handle);

    fsm::open_active(&ccb, shared.netif.as_ref());

    let result = await_completion(&rx);
    shared.timer.cancel(timeout_handle);
    ccb.fsm_lock.lock().unwrap().connection_timer = None;

    match result {
        Ok(()) => {
            debug!(?quad, "connect: established");
            Ok(TcpStream { stack: shared, ccb })
        }
        Err(err) => {
            shared.reclaim(&quad);
            Err(err)
        }
    }
}

/// Passive open: binds a listener.
pub fn listen(stack: &Stack, local: Endpoint, backlog: usize) -> std::io::Result<Arc<Listener>> {
    stack.bind_listener(local, backlog)
}

/// Blocks until a connection in the listener's backlog has finished the handshake.
pub fn accept(stack: &Stack, listener: &Listener) -> std::io::Result<TcpStream> {
    let quad = listener.backlog_rx.recv().map_err(|_| tcp_error(TcpErrorKind::ConnAborted))?;
    let ccb = stack
        .shared
        .find_connection(&quad)
        .ok_or_else(|| tcp_error(TcpErrorKind::ConnAborted))?;
    Ok(TcpStream {
        stack: stack.shared.clone(),
        ccb,
    })
}

fn await_completion(rx: &mailbox::Mailbox) -> std::io::Result<()> {
    loop {
        match rx.recv() {
            Ok(ApiEvent::Complete(CallResult::Ok)) => return Ok(()),
            Ok(ApiEvent::Complete(CallResult::Err(kind, tcp_kind))) => {
                return Err(std::io::Error::new(kind, tcp_kind));
            }
            Ok(ApiEvent::Complete(_)) | Ok(ApiEvent::NotifyUser) => continue,
            Err(_) => return Err(tcp_error(TcpErrorKind::ConnAborted)),
        }
    }
}

/// Enqueues `data` and returns once it has been accepted into the send buffer (not once it
/// has been acked).
pub fn send(stack: &Arc<crate::stack::Shared>, ccb: &Arc<Ccb>, data: &[u8]) -> std::io::Result<usize> {
    let _function_guard = ccb.function_lock.lock().unwrap();
    let n = fsm::send_data(ccb, stack.netif.as_ref(), data)?;
    stack.ensure_retransmit_timer(ccb);
    stack.ensure_probe_timer(ccb);
    Ok(n)
}

/// Blocks until at least one byte is available, the peer has sent FIN, or (if `user_timeout`
/// is given) it elapses with nothing to read — whichever comes first. A user timeout reports
/// `TcpErrorKind::TimedOut` without disturbing the connection: the FSM and its retransmission
/// state are untouched, only this call gives up waiting.
pub fn recv(
    stack: &Arc<crate::stack::Shared>,
    ccb: &Arc<Ccb>,
    buf: &mut [u8],
    user_timeout: Option<Duration>,
) -> std::io::Result<usize> {
    let _function_guard = ccb.function_lock.lock().unwrap();
    let deadline = user_timeout.map(|d| std::time::Instant::now() + d);

    let (tx, rx) = mailbox::mailbox(stack.cfg.mailbox_capacity());
    loop {
        {
            let mut fsm = ccb.fsm_lock.lock().unwrap();
            if fsm.recv_fill > fsm.recv_read {
                let n = stack.buffer_pool.ring_read(ccb.recv_buffer, &mut fsm.recv_read, fsm.recv_fill, buf);
                return Ok(n);
            }
            if !fsm.state.is_readable() {
                return Ok(0); // peer's FIN has already been processed: EOF
            }
            *ccb.waiting_call.lock().unwrap() = Some(tx.clone());
        }

        if let Some(deadline) = deadline {
            if std::time::Instant::now() >= deadline {
                *ccb.waiting_call.lock().unwrap() = None;
                return Err(tcp_error(TcpErrorKind::TimedOut));
            }
        }

        let poll = Duration::from_millis(50);
        let wait = deadline.map_or(poll, |d| poll.min(d.saturating_duration_since(std::time::Instant::now())));
        match rx.recv_timeout(wait) {
            Ok(ApiEvent::NotifyUser) | Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Ok(ApiEvent::Complete(CallResult::Err(kind, tcp_kind))) => return Err(std::io::Error::new(kind, tcp_kind)),
            Ok(ApiEvent::Complete(_)) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return Err(tcp_error(TcpErrorKind::ConnAborted)),
        }
    }
}

/// Sends our FIN and waits for the close sequence to reach `TIME-WAIT`/`CLOSED`.
pub fn close(stack: &Arc<crate::stack::Shared>, ccb: &Arc<Ccb>) -> std::io::Result<()> {
    let _function_guard = ccb.function_lock.lock().unwrap();

    let (tx, rx) = mailbox::mailbox(stack.cfg.mailbox_capacity());
    *ccb.waiting_call.lock().unwrap() = Some(tx);
    fsm::close(ccb, stack.netif.as_ref());
    await_completion(&rx)
}

/// Sends RST unconditionally and tears the CCB down.
pub fn abort(stack: &Arc<crate::stack::Shared>, ccb: &Arc<Ccb>) -> std::io::Result<()> {
    let _function_guard = ccb.function_lock.lock().unwrap();
    fsm::abort(ccb, stack.netif.as_ref());
    stack.reclaim(&ccb.quad);
    Ok(())
}
