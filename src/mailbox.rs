//! Per-call mailbox: rendezvous between a blocking user API call and the FSM.
//!
//! A bounded channel plus a thin newtype so callers don't reach for `crossbeam_channel`
//! directly. Capacity is `Config::mailbox_capacity()` (`2^msg_queue_size_exp`), a power-of-two
//! queue size the caller picks up front rather than letting it grow unbounded.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, SendError, Sender};

/// What the FSM hands back to a blocking caller.
#[derive(Debug, Clone)]
pub enum ApiEvent {
    /// The call's outcome is in: connected, accepted, data delivered, etc.
    Complete(CallResult),
    /// Unsolicited notification while the call is still pending (e.g. partial `recv` data
    /// became available, or window opened for a blocked `send`).
    NotifyUser,
}

/// Outcome of the one API call this mailbox was created for.
#[derive(Debug, Clone)]
pub enum CallResult {
    Ok,
    Data(Vec<u8>),
    Accepted(crate::ccb::Quad),
    Err(std::io::ErrorKind, crate::error::TcpErrorKind),
}

pub struct MailboxSender {
    inner: Sender<ApiEvent>,
}

pub struct Mailbox {
    inner: Receiver<ApiEvent>,
}

/// Creates one mailbox pair sized per `capacity` (see `Config::msg_queue_size_exp`).
pub fn mailbox(capacity: usize) -> (MailboxSender, Mailbox) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    (MailboxSender { inner: tx }, Mailbox { inner: rx })
}

impl MailboxSender {
    pub fn send(&self, event: ApiEvent) -> Result<(), SendError<ApiEvent>> {
        self.inner.send(event)
    }
}

impl Clone for MailboxSender {
    fn clone(&self) -> Self {
        MailboxSender {
            inner: self.inner.clone(),
        }
    }
}

impl Mailbox {
    /// Blocks until either a message arrives or `timeout` elapses.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<ApiEvent, RecvTimeoutError> {
        self.inner.recv_timeout(timeout)
    }

    /// Blocks indefinitely. Used by calls with no user-facing deadline.
    pub fn recv(&self) -> Result<ApiEvent, crossbeam_channel::RecvError> {
        self.inner.recv()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_in_order() {
        let (tx, rx) = mailbox(4);
        tx.send(ApiEvent::NotifyUser).unwrap();
        tx.send(ApiEvent::Complete(CallResult::Ok)).unwrap();

        assert!(matches!(rx.recv().unwrap(), ApiEvent::NotifyUser));
        assert!(matches!(rx.recv().unwrap(), ApiEvent::Complete(CallResult::Ok)));
    }

    #[test]
    fn recv_timeout_expires_without_a_message() {
        let (_tx, rx) = mailbox(1);
        assert!(rx.recv_timeout(Duration::from_millis(20)).is_err());
    }

    #[test]
    fn sender_clone_shares_the_same_queue() {
        let (tx, rx) = mailbox(2);
        let tx2 = tx.clone();
        tx2.send(ApiEvent::NotifyUser).unwrap();
        assert!(matches!(rx.recv().unwrap(), ApiEvent::NotifyUser));
    }
}
