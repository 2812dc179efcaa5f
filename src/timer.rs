//! Global timer service.
//!
//! One background thread per [`TimerService`] services every connection. It parks on a
//! min-heap of deadlines behind a `Mutex`+`Condvar` — a single global timer instance shared by
//! every connection, woken either by a new, earlier deadline or by its own timeout elapsing.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;

use crate::endpoint::Quad;

/// What kind of deadline fired. Carried opaquely by the caller; the timer service itself does
/// not interpret it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Connection,
    Retransmit,
    TimeWait,
    ZeroWindowProbe,
}

/// Message posted to the event loop's shared timer channel on expiry. `conn` lets one global
/// channel (and one `Select` arm) carry every connection's timers rather than needing one
/// channel per connection.
#[derive(Debug, Clone, Copy)]
pub struct TimerExpired {
    pub conn: Quad,
    pub kind: TimerKind,
}

/// Opaque, monotonically increasing handle. `cancel` is idempotent: cancelling an already-fired
/// or already-cancelled handle is a harmless no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

struct Entry {
    deadline: Instant,
    handle: TimerHandle,
    conn: Quad,
    kind: TimerKind,
    sender: Sender<TimerExpired>,
}

// Ordered by deadline only; `BinaryHeap` is a max-heap, so entries are wrapped in `Reverse` at
// the call site to get min-deadline-first semantics.
impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline
    }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline.cmp(&other.deadline)
    }
}

struct Shared {
    heap: Mutex<BinaryHeap<Reverse<Entry>>>,
    cancelled: Mutex<std::collections::HashSet<u64>>,
    condvar: Condvar,
}

/// A single global timer instance servicing all connections.
pub struct TimerService {
    shared: Arc<Shared>,
    next_token: AtomicU64,
}

impl TimerService {
    pub fn new() -> Self {
        let shared = Arc::new(Shared {
            heap: Mutex::new(BinaryHeap::new()),
            cancelled: Mutex::new(std::collections::HashSet::new()),
            condvar: Condvar::new(),
        });

        let worker_shared = shared.clone();
        thread::Builder::new()
            .name("utcp-timer".into())
            .spawn(move || run(worker_shared))
            .expect("failed to spawn timer thread");

        TimerService {
            shared,
            next_token: AtomicU64::new(1),
        }
    }

    /// Enqueues a one-shot delivery `offset` from now, tagged with `conn` so the receiving end
    /// can route it back to the right CCB.
    pub fn schedule(&self, offset: Duration, conn: Quad, kind: TimerKind, mailbox: Sender<TimerExpired>) -> TimerHandle {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let handle = TimerHandle(token);
        let entry = Entry {
            deadline: Instant::now() + offset,
            handle,
            conn,
            kind,
            sender: mailbox,
        };

        let mut heap = self.shared.heap.lock().unwrap();
        heap.push(Reverse(entry));
        drop(heap);
        self.shared.condvar.notify_all();
        handle
    }

    /// Idempotent cancellation.
    pub fn cancel(&self, handle: TimerHandle) {
        self.shared.cancelled.lock().unwrap().insert(handle.0);
    }
}

impl Default for TimerService {
    fn default() -> Self {
        Self::new()
    }
}

fn run(shared: Arc<Shared>) {
    loop {
        let mut heap = shared.heap.lock().unwrap();
        loop {
            let now = Instant::now();
            match heap.peek() {
                None => {
                    heap = shared.condvar.wait(heap).unwrap();
                }
                Some(Reverse(top)) if top.deadline > now => {
                    let wait_for = top.deadline - now;
                    let (guard, _timeout) = shared.condvar.wait_timeout(heap, wait_for).unwrap();
                    heap = guard;
                }
                Some(_) => break,
            }
        }

        let Reverse(entry) = heap.pop().expect("checked non-empty above");
        drop(heap);

        let was_cancelled = {
            let mut cancelled = shared.cancelled.lock().unwrap();
            cancelled.remove(&entry.handle.0)
        };
        if !was_cancelled {
            let _ = entry.sender.send(TimerExpired {
                conn: entry.conn,
                kind: entry.kind,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use std::net::Ipv6Addr;

    fn quad() -> Quad {
        Quad {
            local: Endpoint::new(Ipv6Addr::LOCALHOST, 1000),
            remote: Endpoint::new(Ipv6Addr::LOCALHOST, 2000),
        }
    }

    #[test]
    fn fires_after_offset() {
        let svc = TimerService::new();
        let (tx, rx) = crossbeam_channel::unbounded();
        svc.schedule(Duration::from_millis(20), quad(), TimerKind::Retransmit, tx);

        let msg = rx.recv_timeout(Duration::from_secs(1)).expect("timer did not fire");
        assert_eq!(msg.kind, TimerKind::Retransmit);
    }

    #[test]
    fn cancel_suppresses_delivery() {
        let svc = TimerService::new();
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = svc.schedule(Duration::from_millis(20), quad(), TimerKind::Connection, tx);
        svc.cancel(handle);

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn cancel_is_idempotent() {
        let svc = TimerService::new();
        let (tx, _rx) = crossbeam_channel::unbounded();
        let handle = svc.schedule(Duration::from_millis(20), quad(), TimerKind::Connection, tx);
        svc.cancel(handle);
        svc.cancel(handle); // must not panic
    }
}
