//! Top-level orchestrator: owns the CCB table, the listener table, the buffer pool and the
//! timer service, and spawns the event-loop thread.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use fxhash::FxHashMap;
use tracing::{debug, info};

use crate::buffer_pool::BufferPool;
use crate::ccb::{Ccb, State, StatusFlags};
use crate::config::Config;
use crate::endpoint::{Endpoint, Quad};
use crate::error::{tcp_error, TcpErrorKind};
use crate::eventloop;
use crate::fsm;
use crate::netif::{Inbound, NetIf};
use crate::timer::{TimerExpired, TimerKind, TimerService};
use crate::wire::TcpSegment;

/// A bound passive-open endpoint awaiting connections.
pub struct Listener {
    pub local: Endpoint,
    pub allow_any_addr: bool,
    pub backlog_tx: crossbeam_channel::Sender<Quad>,
    pub backlog_rx: crossbeam_channel::Receiver<Quad>,
}

/// State shared between the [`Stack`] handle, the event-loop thread and every live CCB.
pub struct Shared {
    pub cfg: Config,
    pub netif: Arc<dyn NetIf>,
    pub buffer_pool: BufferPool,
    pub timer: TimerService,

    pub connections: Mutex<FxHashMap<Quad, Arc<Ccb>>>,
    pub listeners: Mutex<FxHashMap<Endpoint, Arc<Listener>>>,

    pub network_tx: crossbeam_channel::Sender<Inbound>,
    pub network_rx: crossbeam_channel::Receiver<Inbound>,
    pub timer_tx: crossbeam_channel::Sender<TimerExpired>,
    pub timer_rx: crossbeam_channel::Receiver<TimerExpired>,

    iss_counter: AtomicU32,
}

impl Shared {
    pub fn find_connection(&self, quad: &Quad) -> Option<Arc<Ccb>> {
        self.connections.lock().unwrap().get(quad).cloned()
    }

    pub fn reclaim(&self, quad: &Quad) {
        if let Some(ccb) = self.connections.lock().unwrap().remove(quad) {
            self.buffer_pool.release(ccb.recv_buffer);
            debug!(?quad, "connection reclaimed");
        }
    }

    fn next_iss(&self) -> u32 {
        // RFC 9293 §3.4.1 calls for a clock-driven ISN; a wrapping per-stack counter keeps
        // successive connections from reusing a sequence space while something about them is
        // still outstanding, without pulling in a wall-clock dependency here.
        self.iss_counter.fetch_add(1 + (1 << 24), Ordering::Relaxed)
    }

    /// Matches an inbound SYN against the listener table and, on a hit, spins up a new
    /// `SYN-RCVD` CCB.
    pub fn try_accept(&self, quad: Quad, seg: TcpSegment) {
        use crate::wire::TcpFlags;
        if !seg.flags.contains(TcpFlags::SYN) || seg.flags.contains(TcpFlags::ACK) {
            return; // not a connection request; silently dropped per RFC 9293 CLOSED-state rule
        }

        let listeners = self.listeners.lock().unwrap();
        let listener = listeners
            .get(&quad.local)
            .or_else(|| {
                listeners
                    .values()
                    .find(|l| l.allow_any_addr && l.local.port() == quad.local.port())
            })
            .cloned();
        drop(listeners);

        let Some(listener) = listener else {
            return;
        };

        let Some(handle) = self.buffer_pool.get() else {
            debug!(?quad, "refusing connection: buffer pool exhausted");
            return;
        };

        let ccb = Ccb::new(quad, self.cfg.clone(), handle, self.next_iss(), State::Listen);
        ccb.fsm_lock.lock().unwrap().status.insert(StatusFlags::PASSIVE | StatusFlags::LISTEN_REOPEN);
        *ccb.accept_backlog.lock().unwrap() = Some(listener.backlog_tx.clone());
        self.connections.lock().unwrap().insert(quad, ccb.clone());
        fsm::accept_syn(&ccb, self.netif.as_ref(), seg);

        // Guards the handshake against a lost SYN+ACK or a final ACK that never arrives: retries
        // up to `syn_retries` before giving the slot back, per `on_connection_timeout`.
        let retry_handle = self.timer.schedule(self.cfg.rto_min, quad, TimerKind::Connection, self.timer_tx.clone());
        ccb.fsm_lock.lock().unwrap().connection_timer = Some(retry_handle);
    }

    /// Arms the retransmit timer if there is now something in flight and nothing already
    /// scheduled (the queue holds at most one in-flight descriptor, so at most one
    /// retransmit timer is ever live per connection).
    pub fn ensure_retransmit_timer(&self, ccb: &Arc<Ccb>) {
        let delay = {
            let fsm = ccb.fsm_lock.lock().unwrap();
            if fsm.retransmit_timer.is_some() || fsm.retransmit.inflight().is_none() {
                return;
            }
            fsm.retransmit.current_rto()
        };
        let handle = self.timer.schedule(delay, ccb.quad, TimerKind::Retransmit, self.timer_tx.clone());
        ccb.fsm_lock.lock().unwrap().retransmit_timer = Some(handle);
    }

    /// Called from the event loop after a retransmit fires: re-arms for `next` or clears the
    /// slot once nothing is outstanding anymore.
    pub fn reschedule_retransmit_timer(&self, ccb: &Arc<Ccb>, next: Option<Duration>) {
        ccb.fsm_lock.lock().unwrap().retransmit_timer = None;
        if let Some(delay) = next {
            let handle = self.timer.schedule(delay, ccb.quad, TimerKind::Retransmit, self.timer_tx.clone());
            ccb.fsm_lock.lock().unwrap().retransmit_timer = Some(handle);
        }
    }

    /// Re-arms the connection timer for `next` more, or clears the slot once the firing that
    /// just happened needs no follow-up (established, or a retry budget just ran out).
    pub fn reschedule_connection_timer(&self, ccb: &Arc<Ccb>, next: Option<Duration>) {
        ccb.fsm_lock.lock().unwrap().connection_timer = None;
        if let Some(delay) = next {
            let handle = self.timer.schedule(delay, ccb.quad, TimerKind::Connection, self.timer_tx.clone());
            ccb.fsm_lock.lock().unwrap().connection_timer = Some(handle);
        }
    }

    /// Arms the zero-window probe timer the first time the peer's window closes with data
    /// still queued (probe interval clamped to `[probe_lower_bound,
    /// probe_upper_bound]`).
    pub fn ensure_probe_timer(&self, ccb: &Arc<Ccb>) {
        let delay = {
            let fsm = ccb.fsm_lock.lock().unwrap();
            if fsm.probe_timer.is_some() || fsm.snd.wnd != 0 || fsm.unacked.is_empty() {
                return;
            }
            fsm.probe_backoff
        };
        let handle = self.timer.schedule(delay, ccb.quad, TimerKind::ZeroWindowProbe, self.timer_tx.clone());
        ccb.fsm_lock.lock().unwrap().probe_timer = Some(handle);
    }

    pub fn reschedule_probe_timer(&self, ccb: &Arc<Ccb>, next: Option<Duration>) {
        ccb.fsm_lock.lock().unwrap().probe_timer = None;
        if let Some(delay) = next {
            let handle = self.timer.schedule(delay, ccb.quad, TimerKind::ZeroWindowProbe, self.timer_tx.clone());
            ccb.fsm_lock.lock().unwrap().probe_timer = Some(handle);
        }
    }

    /// Arms the 2*MSL quiet timer the moment a connection enters `TIME-WAIT`.
    pub fn ensure_timewait_timer(&self, ccb: &Arc<Ccb>) {
        {
            let fsm = ccb.fsm_lock.lock().unwrap();
            if fsm.state != State::TimeWait || fsm.time_wait_timer.is_some() {
                return;
            }
        }
        let handle = self.timer.schedule(self.cfg.msl * 2, ccb.quad, TimerKind::TimeWait, self.timer_tx.clone());
        ccb.fsm_lock.lock().unwrap().time_wait_timer = Some(handle);
    }
}

/// Handle to a running engine instance.
pub struct Stack {
    pub shared: Arc<Shared>,
}

impl Stack {
    pub fn new(cfg: Config, netif: Arc<dyn NetIf>) -> Self {
        let (network_tx, network_rx) = crossbeam_channel::unbounded();
        let (timer_tx, timer_rx) = crossbeam_channel::unbounded();
        let buffer_pool = BufferPool::new(cfg.max_connections, cfg.recv_buffer_cap);

        let shared = Arc::new(Shared {
            cfg,
            netif,
            buffer_pool,
            timer: TimerService::new(),
            connections: Mutex::new(FxHashMap::default()),
            listeners: Mutex::new(FxHashMap::default()),
            network_tx,
            network_rx,
            timer_tx,
            timer_rx,
            iss_counter: AtomicU32::new(1),
        });

        let loop_shared = shared.clone();
        thread::Builder::new()
            .name("utcp-eventloop".into())
            .spawn(move || eventloop::run(loop_shared))
            .expect("failed to spawn event-loop thread");

        info!("engine started");
        Stack { shared }
    }

    /// Entry point for whatever reads segments off the wire below this engine.
    pub fn deliver_inbound(&self, inbound: Inbound) {
        let _ = self.shared.network_tx.send(inbound);
    }

    /// Registers a passive-open endpoint. Returns an error if one is already bound there
    /// (`AddrInUse`) unless `reuseaddr`-equivalent semantics are out of scope here.
    pub fn bind_listener(&self, local: Endpoint, backlog: usize) -> std::io::Result<Arc<Listener>> {
        let mut listeners = self.shared.listeners.lock().unwrap();
        if listeners.contains_key(&local) {
            return Err(tcp_error(TcpErrorKind::AddrInUse));
        }
        let (backlog_tx, backlog_rx) = crossbeam_channel::bounded(backlog.max(1));
        let listener = Arc::new(Listener {
            local,
            allow_any_addr: local.is_unspecified(),
            backlog_tx,
            backlog_rx,
        });
        listeners.insert(local, listener.clone());
        Ok(listener)
    }

    pub fn register_connection(&self, ccb: Arc<Ccb>) {
        self.shared.connections.lock().unwrap().insert(ccb.quad, ccb);
    }

    pub fn next_iss(&self) -> u32 {
        self.shared.next_iss()
    }
}
