//! Connection Control Block: FSM state, sequence spaces and the dual-lock concurrency model.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::buffer_pool::BufferHandle;
use crate::config::Config;
use crate::mailbox::MailboxSender;
use crate::retransmit::RetransmitQueue;

pub use crate::endpoint::Quad;

/// RFC 9293 §3.3.1 finite states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Listen,
    SynSent,
    SynRcvd,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
    Closed,
}

impl State {
    pub fn is_synchronized(&self) -> bool {
        !matches!(self, State::Listen | State::SynSent | State::SynRcvd | State::Closed)
    }

    /// Whether a user `send` call may enqueue data in this state.
    pub fn is_writable(&self) -> bool {
        matches!(self, State::Established | State::CloseWait)
    }

    /// Whether the peer may still send us data we haven't seen yet.
    pub fn is_readable(&self) -> bool {
        matches!(
            self,
            State::Established | State::FinWait1 | State::FinWait2
        )
    }
}

bitflags::bitflags! {
    /// Per-connection status bits, independent of FSM state.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct StatusFlags: u32 {
        /// Created by a passive open (`listen`/`accept`), not `connect`.
        const PASSIVE              = 0b0000_0001;
        /// A passive-open listener bound to the unspecified address accepts any destination.
        const ALLOW_ANY_ADDR       = 0b0000_0010;
        /// A `NotifyUser` event is queued but not yet delivered.
        const NOTIFICATIONS_PENDING = 0b0000_0100;
        /// Our FIN has been sent; guards against resending it.
        const FIN_SENT             = 0b0000_1000;
        /// A `listen` call should re-arm itself after yielding this connection to `accept`.
        const LISTEN_REOPEN        = 0b0001_0000;
    }
}

/// `SND.*` variables, RFC 9293 §3.3.1.
#[derive(Debug, Clone, Copy)]
pub struct SendSequenceSpace {
    pub una: u32,
    pub nxt: u32,
    pub wnd: u16,
    pub up: bool,
    pub wl1: u32,
    pub wl2: u32,
    pub iss: u32,
}

/// `RCV.*` variables, RFC 9293 §3.3.1.
#[derive(Debug, Clone, Copy)]
pub struct RecvSequenceSpace {
    pub nxt: u32,
    pub wnd: u16,
    pub up: bool,
    pub irs: u32,
}

/// Sequence-number comparison with wraparound, RFC 9293 §3.4.
pub fn wrapping_lt(lhs: u32, rhs: u32) -> bool {
    lhs.wrapping_sub(rhs) as i32 > (i32::MAX / 2) || (lhs != rhs && rhs.wrapping_sub(lhs) <= i32::MAX as u32)
}

/// True iff `x` is strictly between `start` and `end` in sequence space, wrapping allowed.
pub fn is_between_wrapped(start: u32, x: u32, end: u32) -> bool {
    wrapping_lt(start, x) && wrapping_lt(x, end)
}

/// The Connection Control Block. One instance per non-`LISTEN` connection, shared via `Arc`
/// between the event-loop thread and whichever API-call thread currently owns `function_lock`.
pub struct Ccb {
    pub quad: Quad,
    pub cfg: Config,

    /// Guards FSM transitions and the sequence spaces: held by the event loop while processing
    /// an inbound segment or a timer expiration.
    pub fsm_lock: Mutex<FsmState>,

    /// Serializes user API calls on this connection: only one of `send`/`recv`/`close`/...
    /// may be in flight at a time.
    pub function_lock: Mutex<()>,

    /// The mailbox of whichever API call is currently blocked on this connection, if any.
    pub waiting_call: Mutex<Option<MailboxSender>>,

    /// Set only for passively-opened connections: where to announce this quad once the
    /// handshake completes, so the owning listener's `accept` can pick it up.
    pub accept_backlog: Mutex<Option<crossbeam_channel::Sender<Quad>>>,

    pub recv_buffer: BufferHandle,
}

/// Everything the FSM mutates under `fsm_lock`.
pub struct FsmState {
    pub state: State,
    pub status: StatusFlags,
    pub snd: SendSequenceSpace,
    pub rcv: RecvSequenceSpace,
    pub unacked: VecDeque<u8>,
    /// Byte counters into the connection's lent [`BufferHandle`] (`Ccb::recv_buffer`), treating
    /// it as a ring: `recv_fill - recv_read` bytes are buffered and unread, and both counters
    /// only ever increase — the buffer index is `counter % capacity`.
    pub recv_read: usize,
    pub recv_fill: usize,
    pub retransmit: RetransmitQueue,
    pub syn_retries_remaining: usize,
    pub connection_timer: Option<crate::timer::TimerHandle>,
    pub retransmit_timer: Option<crate::timer::TimerHandle>,
    pub time_wait_timer: Option<crate::timer::TimerHandle>,
    pub probe_timer: Option<crate::timer::TimerHandle>,
    pub probe_backoff: std::time::Duration,
    pub error: Option<crate::error::TcpErrorKind>,
}

impl Ccb {
    pub fn new(quad: Quad, cfg: Config, recv_buffer: BufferHandle, iss: u32, state: State) -> Arc<Self> {
        let fsm = FsmState {
            state,
            status: StatusFlags::empty(),
            snd: SendSequenceSpace {
                una: iss,
                nxt: iss,
                wnd: 0,
                up: false,
                wl1: 0,
                wl2: 0,
                iss,
            },
            rcv: RecvSequenceSpace {
                nxt: 0,
                wnd: cfg.recv_buffer_cap.min(u16::MAX as usize) as u16,
                up: false,
                irs: 0,
            },
            unacked: VecDeque::new(),
            recv_read: 0,
            recv_fill: 0,
            retransmit: RetransmitQueue::with_bounds(cfg.rto_min, cfg.rto_max),
            syn_retries_remaining: cfg.syn_retries,
            connection_timer: None,
            retransmit_timer: None,
            time_wait_timer: None,
            probe_timer: None,
            probe_backoff: cfg.probe_lower_bound,
            error: None,
        };

        Arc::new(Ccb {
            quad,
            cfg,
            fsm_lock: Mutex::new(fsm),
            function_lock: Mutex::new(()),
            waiting_call: Mutex::new(None),
            accept_backlog: Mutex::new(None),
            recv_buffer,
        })
    }
}
