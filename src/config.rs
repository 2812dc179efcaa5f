//! Tunables recognized by the engine.

use std::time::Duration;

/// Configuration shared by every connection spawned from the same [`crate::Stack`].
///
/// A single plain data struct handed to every connection constructor, cloned per-connection so
/// an individual stream can still be retargeted later without mutating the stack-wide defaults.
#[derive(Clone, Debug)]
pub struct Config {
    /// Overall idle timeout for any blocking API call.
    pub connection_timeout: Duration,
    /// Lower clamp on the zero-window probe interval.
    pub probe_lower_bound: Duration,
    /// Upper clamp on the zero-window probe interval.
    pub probe_upper_bound: Duration,
    /// `log2` of the bounded mailbox capacity backing each blocking API call.
    pub msg_queue_size_exp: u32,
    /// Lower clamp on the retransmission timeout.
    pub rto_min: Duration,
    /// Upper clamp on the retransmission timeout.
    pub rto_max: Duration,
    /// Maximum Segment Lifetime; `TIME_WAIT` lasts `2 * msl`.
    pub msl: Duration,
    /// Byte capacity of each lent receive buffer.
    pub recv_buffer_cap: usize,
    /// Capacity of the receive-buffer pool / CCB table.
    pub max_connections: usize,
    /// Number of SYN/SYN-ACK retransmissions attempted before giving up.
    pub syn_retries: usize,
    /// Peer MSS to advertise; `None` picks the RFC 9293 default for IPv6 (1220).
    pub mss: Option<u16>,
}

impl Config {
    /// Mailbox capacity derived from [`Self::msg_queue_size_exp`].
    pub fn mailbox_capacity(&self) -> usize {
        1usize << self.msg_queue_size_exp
    }

    pub(crate) fn default_mss(&self) -> u16 {
        // RFC 9293 3.7.1: "MUST assume a default send MSS of ... 1220 for IPv6".
        self.mss.unwrap_or(1220)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(60),
            probe_lower_bound: Duration::from_millis(500),
            probe_upper_bound: Duration::from_secs(60),
            msg_queue_size_exp: 3,
            rto_min: Duration::from_millis(200),
            rto_max: Duration::from_secs(60),
            msl: Duration::from_secs(30),
            recv_buffer_cap: 4096,
            max_connections: 128,
            syn_retries: 3,
            mss: None,
        }
    }
}
