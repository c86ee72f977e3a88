//! Sequence number arithmetic and the k/w sliding windows.
//!
//! Send and receive sequence numbers are 15-bit counters that wrap at
//! 32768. The send window keeps the send instant of every unacknowledged
//! I-frame so the T1 deadline always belongs to the oldest one.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::SEQUENCE_MODULUS;
use crate::error::{Iec60870Error, Result};

/// Next sequence number after `seq`.
#[inline]
pub const fn seq_next(seq: u16) -> u16 {
    (seq + 1) % SEQUENCE_MODULUS
}

/// Distance from `from` forward to `to`, modulo 32768.
#[inline]
pub const fn seq_distance(from: u16, to: u16) -> u16 {
    (to.wrapping_sub(from)) % SEQUENCE_MODULUS
}

/// Outstanding sent I-frames, bounded by k.
#[derive(Debug)]
pub struct SendWindow {
    k: u16,
    next_seq: u16,
    sent: VecDeque<Instant>,
}

impl SendWindow {
    /// Create an empty window of size `k`.
    pub fn new(k: u16) -> Self {
        Self {
            k,
            next_seq: 0,
            sent: VecDeque::with_capacity(k as usize),
        }
    }

    /// Sequence number the next I-frame will carry.
    #[inline]
    pub fn next_seq(&self) -> u16 {
        self.next_seq
    }

    /// Number of sent but unacknowledged I-frames.
    #[inline]
    pub fn unacked(&self) -> u16 {
        self.sent.len() as u16
    }

    /// Whether k frames are outstanding.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.unacked() >= self.k
    }

    /// Claim a sequence number for a frame sent at `now`.
    ///
    /// Fails with [`Iec60870Error::TooManyUnconfirmed`] when k frames are
    /// already outstanding; the window is left unchanged in that case.
    pub fn reserve(&mut self, now: Instant) -> Result<u16> {
        if self.is_full() {
            return Err(Iec60870Error::TooManyUnconfirmed(self.k));
        }
        let seq = self.next_seq;
        self.next_seq = seq_next(seq);
        self.sent.push_back(now);
        Ok(seq)
    }

    /// Apply an acknowledgment carrying receive sequence `ack_seq`.
    ///
    /// Returns the number of newly acknowledged frames. A value outside
    /// `(0, unacked]` is ignored and yields `None`; an acknowledgment that
    /// repeats the current state yields `Some(0)`.
    pub fn acknowledge(&mut self, ack_seq: u16) -> Option<u16> {
        let unacked = self.unacked();
        let oldest = seq_distance(unacked, self.next_seq);
        let acked = seq_distance(oldest, ack_seq);
        if acked == 0 {
            return Some(0);
        }
        if acked > unacked {
            return None;
        }
        self.sent.drain(..acked as usize);
        Some(acked)
    }

    /// Deadline of the oldest outstanding frame.
    pub fn t1_deadline(&self, t1: Duration) -> Option<Instant> {
        self.sent.front().map(|sent| *sent + t1)
    }

    /// Forget all outstanding frames and restart numbering at 0.
    pub fn reset(&mut self) {
        self.next_seq = 0;
        self.sent.clear();
    }
}

/// Received I-frames not yet acknowledged, bounded by w.
#[derive(Debug)]
pub struct ReceiveWindow {
    w: u16,
    next_seq: u16,
    unacked: u16,
}

impl ReceiveWindow {
    /// Create an empty window with acknowledgment threshold `w`.
    pub fn new(w: u16) -> Self {
        Self {
            w,
            next_seq: 0,
            unacked: 0,
        }
    }

    /// Expected send sequence of the next I-frame; also the value acknowledged.
    #[inline]
    pub fn next_seq(&self) -> u16 {
        self.next_seq
    }

    /// Number of received but unacknowledged I-frames.
    #[inline]
    pub fn unacked(&self) -> u16 {
        self.unacked
    }

    /// Accept an I-frame with send sequence `send_seq`.
    ///
    /// Returns `true` once w frames are unacknowledged. A frame out of order
    /// is a protocol error.
    pub fn accept(&mut self, send_seq: u16) -> Result<bool> {
        if send_seq != self.next_seq {
            return Err(Iec60870Error::protocol(format!(
                "unexpected send sequence {} (expected {})",
                send_seq, self.next_seq
            )));
        }
        self.next_seq = seq_next(self.next_seq);
        self.unacked += 1;
        Ok(self.unacked >= self.w)
    }

    /// Mark everything received so far as acknowledged and return the
    /// receive sequence to report.
    pub fn acknowledge_all(&mut self) -> u16 {
        self.unacked = 0;
        self.next_seq
    }

    /// Restart numbering at 0.
    pub fn reset(&mut self) {
        self.next_seq = 0;
        self.unacked = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_arithmetic() {
        assert_eq!(seq_next(0), 1);
        assert_eq!(seq_next(32767), 0);
        assert_eq!(seq_distance(10, 15), 5);
        assert_eq!(seq_distance(32766, 1), 3);
        assert_eq!(seq_distance(7, 7), 0);
    }

    #[test]
    fn test_k_window() {
        let now = Instant::now();
        let mut window = SendWindow::new(3);
        for expected in 0..3 {
            assert_eq!(window.reserve(now).unwrap(), expected);
        }
        assert!(window.is_full());
        assert!(matches!(
            window.reserve(now),
            Err(Iec60870Error::TooManyUnconfirmed(3))
        ));
        assert_eq!(window.next_seq(), 3);

        // Peer acknowledges the first frame
        assert_eq!(window.acknowledge(1), Some(1));
        assert_eq!(window.reserve(now).unwrap(), 3);
    }

    #[test]
    fn test_acknowledge_ranges() {
        let now = Instant::now();
        let mut window = SendWindow::new(12);
        for _ in 0..4 {
            window.reserve(now).unwrap();
        }
        // Repeated acknowledgment of nothing new
        assert_eq!(window.acknowledge(0), Some(0));
        // Acknowledging beyond what was sent is ignored
        assert_eq!(window.acknowledge(9), None);
        assert_eq!(window.unacked(), 4);

        assert_eq!(window.acknowledge(2), Some(2));
        assert_eq!(window.unacked(), 2);
        // Stale acknowledgment
        assert_eq!(window.acknowledge(1), None);
        assert_eq!(window.acknowledge(4), Some(2));
        assert_eq!(window.unacked(), 0);
    }

    #[test]
    fn test_acknowledge_across_wrap() {
        let now = Instant::now();
        let mut window = SendWindow::new(12);
        window.next_seq = 32766;
        for _ in 0..4 {
            window.reserve(now).unwrap();
        }
        assert_eq!(window.next_seq(), 2);
        assert_eq!(window.acknowledge(0), Some(2));
        assert_eq!(window.acknowledge(2), Some(2));
    }

    #[test]
    fn test_t1_deadline_follows_oldest() {
        let start = Instant::now();
        let t1 = Duration::from_secs(15);
        let mut window = SendWindow::new(12);
        assert_eq!(window.t1_deadline(t1), None);

        window.reserve(start).unwrap();
        window.reserve(start + Duration::from_secs(5)).unwrap();
        assert_eq!(window.t1_deadline(t1), Some(start + t1));

        window.acknowledge(1);
        assert_eq!(
            window.t1_deadline(t1),
            Some(start + Duration::from_secs(5) + t1)
        );
        window.acknowledge(2);
        assert_eq!(window.t1_deadline(t1), None);
    }

    #[test]
    fn test_receive_window_threshold() {
        let mut window = ReceiveWindow::new(3);
        assert!(!window.accept(0).unwrap());
        assert!(!window.accept(1).unwrap());
        assert!(window.accept(2).unwrap());
        assert_eq!(window.acknowledge_all(), 3);
        assert_eq!(window.unacked(), 0);
    }

    #[test]
    fn test_receive_out_of_order() {
        let mut window = ReceiveWindow::new(8);
        window.accept(0).unwrap();
        assert!(matches!(window.accept(2), Err(Iec60870Error::Protocol(_))));
    }
}
