//! Retransmission queue and RTO estimator (RFC 6298).
//!
//! The queue holds at most one in-flight descriptor: this engine retransmits the oldest unacked
//! region as a whole rather than tracking per-segment state.

use std::time::{Duration, Instant};

/// RFC 6298's clock granularity floor `G`: the minimum resolution the RTO computation assumes
/// for the timer driving it, so a tiny or zero `RTTVAR` still leaves headroom before the segment
/// is presumed lost.
const CLOCK_GRANULARITY: Duration = Duration::from_millis(100);

/// One outstanding region of unacknowledged bytes awaiting either an ACK or a timeout.
#[derive(Debug, Clone, Copy)]
pub struct InFlight {
    pub seq_lo: u32,
    pub seq_hi: u32,
    pub sent_at: Instant,
    pub retries: u32,
}

pub struct RetransmitQueue {
    inflight: Option<InFlight>,
    srtt: Option<f64>,
    rttvar: Option<f64>,
    rto: Duration,
    rto_min: Duration,
    rto_max: Duration,
}

impl RetransmitQueue {
    pub fn new() -> Self {
        RetransmitQueue {
            inflight: None,
            srtt: None,
            rttvar: None,
            rto: Duration::from_secs(1),
            rto_min: Duration::from_millis(200),
            rto_max: Duration::from_secs(60),
        }
    }

    pub fn with_bounds(rto_min: Duration, rto_max: Duration) -> Self {
        RetransmitQueue {
            rto: rto_min.max(Duration::from_secs(1)).min(rto_max),
            rto_min,
            rto_max,
            ..Self::new()
        }
    }

    pub fn current_rto(&self) -> Duration {
        self.rto
    }

    pub fn inflight(&self) -> Option<InFlight> {
        self.inflight
    }

    /// Marks `[seq_lo, seq_hi)` as sent right now, with `retries` prior attempts.
    pub fn mark_sent(&mut self, seq_lo: u32, seq_hi: u32, retries: u32) {
        self.inflight = Some(InFlight {
            seq_lo,
            seq_hi,
            sent_at: Instant::now(),
            retries,
        });
    }

    pub fn clear(&mut self) {
        self.inflight = None;
    }

    /// Whether `self.inflight` has timed out against the current RTO.
    pub fn has_expired(&self) -> bool {
        match self.inflight {
            Some(seg) => seg.sent_at.elapsed() >= self.rto,
            None => false,
        }
    }

    /// Folds one fresh RTT sample into the estimator, RFC 6298 §2.
    ///
    /// Callers must apply Karn's algorithm themselves: never call this for a segment that was
    /// retransmitted before being acked, since the ACK cannot then be attributed to a single
    /// transmission.
    pub fn sample_rtt(&mut self, measured: Duration) {
        let r = measured.as_secs_f64();
        match (self.srtt, self.rttvar) {
            (None, _) => {
                self.srtt = Some(r);
                self.rttvar = Some(r / 2.0);
            }
            (Some(srtt), Some(rttvar)) => {
                let rttvar_new = 0.75 * rttvar + 0.25 * (srtt - r).abs();
                let srtt_new = 0.875 * srtt + 0.125 * r;
                self.rttvar = Some(rttvar_new);
                self.srtt = Some(srtt_new);
            }
            _ => unreachable!("srtt and rttvar are always set together"),
        }
        let srtt = self.srtt.unwrap();
        let rttvar = self.rttvar.unwrap();
        let variance_term = (4.0 * rttvar).max(CLOCK_GRANULARITY.as_secs_f64());
        let computed = Duration::from_secs_f64(srtt + variance_term);
        self.rto = computed.clamp(self.rto_min, self.rto_max);
    }

    /// Exponential backoff applied on every retransmit, RFC 6298 §5.5.
    pub fn back_off(&mut self) {
        self.rto = (self.rto * 2).min(self.rto_max);
    }
}

impl Default for RetransmitQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_sets_srtt_directly() {
        let mut q = RetransmitQueue::new();
        q.sample_rtt(Duration::from_millis(100));
        assert!(q.current_rto() >= Duration::from_millis(100));
    }

    #[test]
    fn back_off_doubles_up_to_max() {
        let mut q = RetransmitQueue::with_bounds(Duration::from_millis(200), Duration::from_secs(2));
        q.sample_rtt(Duration::from_millis(200));
        let before = q.current_rto();
        q.back_off();
        assert_eq!(q.current_rto(), (before * 2).min(Duration::from_secs(2)));
        for _ in 0..10 {
            q.back_off();
        }
        assert_eq!(q.current_rto(), Duration::from_secs(2));
    }

    #[test]
    fn mark_sent_and_clear_round_trip() {
        let mut q = RetransmitQueue::new();
        assert!(q.inflight().is_none());
        q.mark_sent(0, 100, 0);
        assert!(q.inflight().is_some());
        q.clear();
        assert!(q.inflight().is_none());
    }
}
