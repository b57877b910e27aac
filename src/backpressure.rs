//! Credit-based flow control.
//!
//! Every non-empty DATA frame must eventually be covered by a cumulative ACK
//! from the receiving side. This module holds the bookkeeping for both ends of
//! that exchange as plain value types; the sessions wire them to their I/O.
//!
//! - [`SourceCredit`]: the receiver paces a local source. Output bytes are
//!   counted as they are sent, the source is paused once the count reaches the
//!   high-water mark and resumed when ACKs bring it back below.
//! - [`AckCoalescer`]: a local sink paces the remote sender. Bytes delivered
//!   to a sink without backlog are acked at once; bytes delivered into a
//!   backlog are held back and acked in one go when the sink drains.
//! - [`PendingWrites`]: FIFO of sent-but-unacknowledged writes, completed in
//!   order as cumulative ACKs arrive.

use std::collections::VecDeque;

use crate::error::{Result, ShellError};

/// What a source should do after a credit change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowSignal {
    /// Stop producing until resumed.
    Pause,
    /// Produce again.
    Resume,
}

/// Outstanding-byte counter for one outbound stream paced by remote ACKs.
///
/// Pause and resume are edge-triggered: each is signaled at most once per
/// crossing of the high-water mark.
#[derive(Debug, Clone)]
pub struct SourceCredit {
    /// Sent but unacknowledged bytes.
    outstanding: usize,
    /// Outstanding count at which the source is paused.
    high_water_mark: usize,
    /// Whether a pause is in effect.
    paused: bool,
}

impl SourceCredit {
    /// Create a counter with the given high-water mark.
    pub fn new(high_water_mark: usize) -> Self {
        Self {
            outstanding: 0,
            high_water_mark,
            paused: false,
        }
    }

    /// Record `len` bytes sent to the remote.
    ///
    /// Returns [`FlowSignal::Pause`] when this send brings the count to the
    /// high-water mark and the source is not already paused.
    pub fn on_sent(&mut self, len: usize) -> Option<FlowSignal> {
        self.outstanding = self.outstanding.saturating_add(len);
        if !self.paused && self.outstanding >= self.high_water_mark {
            self.paused = true;
            return Some(FlowSignal::Pause);
        }
        None
    }

    /// Record an ACK of `count` bytes.
    ///
    /// Returns [`FlowSignal::Resume`] when a paused source drops below the
    /// high-water mark. An ACK for more bytes than are outstanding is a
    /// protocol violation and leaves the counter unchanged.
    pub fn on_ack(&mut self, count: u32) -> Result<Option<FlowSignal>> {
        let count = count as usize;
        if count > self.outstanding {
            return Err(ShellError::Protocol(format!(
                "acknowledgment of {} bytes exceeds {} outstanding",
                count, self.outstanding
            )));
        }
        self.outstanding -= count;
        if self.paused && self.outstanding < self.high_water_mark {
            self.paused = false;
            return Ok(Some(FlowSignal::Resume));
        }
        Ok(None)
    }

    /// Sent but unacknowledged bytes.
    #[inline]
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Whether the source is currently paused.
    #[inline]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Get the high-water mark.
    #[inline]
    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }
}

/// ACK accumulator for one inbound stream delivered to a local sink.
#[derive(Debug, Clone, Default)]
pub struct AckCoalescer {
    /// Delivered bytes whose ACK waits for the sink to drain.
    held: u32,
}

impl AckCoalescer {
    /// Create an empty coalescer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record delivery of `len` bytes to the sink.
    ///
    /// `accepted` is the sink's answer: `true` when it took the chunk without
    /// building a backlog. Returns the ACK to send now, if any.
    pub fn on_delivered(&mut self, len: usize, accepted: bool) -> Option<u32> {
        let len = u32::try_from(len).unwrap_or(u32::MAX);
        if accepted {
            return Some(len);
        }
        self.held = self.held.saturating_add(len);
        None
    }

    /// The sink drained its backlog. Returns the coalesced ACK, if any.
    pub fn on_drained(&mut self) -> Option<u32> {
        match std::mem::take(&mut self.held) {
            0 => None,
            held => Some(held),
        }
    }

    /// Bytes delivered but not yet acknowledged.
    #[inline]
    pub fn held(&self) -> u32 {
        self.held
    }
}

/// One sent-but-unacknowledged write.
#[derive(Debug)]
struct PendingWrite<T> {
    /// Bytes still awaiting acknowledgment. Zero marks the end-of-stream sentinel.
    remaining: usize,
    /// Completion handed back once the write is fully acknowledged.
    completion: Option<T>,
}

/// FIFO of outbound writes awaiting cumulative acknowledgment.
///
/// `T` is the completion token returned when an entry is fully acknowledged,
/// e.g. a oneshot sender. Entries without a token complete silently, which is
/// how all but the last frame of a split write are queued.
#[derive(Debug)]
pub struct PendingWrites<T> {
    queue: VecDeque<PendingWrite<T>>,
    /// Sum of `remaining` over the queue.
    unacknowledged: usize,
}

impl<T> PendingWrites<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            unacknowledged: 0,
        }
    }

    /// Queue a sent DATA frame of `len` bytes (`len > 0`).
    pub fn push(&mut self, len: usize, completion: Option<T>) {
        debug_assert!(len > 0, "empty writes are end-of-stream sentinels");
        self.unacknowledged += len;
        self.queue.push_back(PendingWrite {
            remaining: len,
            completion,
        });
    }

    /// Queue the end-of-stream sentinel, released by an ACK of zero.
    pub fn push_eof(&mut self, completion: Option<T>) {
        self.queue.push_back(PendingWrite {
            remaining: 0,
            completion,
        });
    }

    /// Apply an ACK of `count` bytes.
    ///
    /// Completion tokens of every entry the ACK finished are appended to
    /// `completed` in submission order, even when the ACK is also rejected.
    /// A zero ACK must find the end-of-stream sentinel at the head of the
    /// queue; a non-zero ACK never releases the sentinel and must not exceed
    /// the bytes awaiting acknowledgment ahead of it.
    pub fn acknowledge(&mut self, count: u32, completed: &mut Vec<T>) -> Result<()> {
        if count == 0 {
            return match self.queue.front() {
                Some(head) if head.remaining == 0 => {
                    completed.extend(self.queue.pop_front().and_then(|w| w.completion));
                    Ok(())
                }
                Some(_) => Err(ShellError::Protocol(
                    "stdin closed before all writes were acknowledged".to_string(),
                )),
                None => Err(ShellError::Protocol(
                    "end of stdin acknowledged but never sent".to_string(),
                )),
            };
        }

        let mut left = count as usize;
        while left > 0 {
            let Some(head) = self.queue.front_mut() else {
                break;
            };
            if head.remaining == 0 {
                break;
            }
            if head.remaining <= left {
                left -= head.remaining;
                self.unacknowledged -= head.remaining;
                completed.extend(self.queue.pop_front().and_then(|w| w.completion));
            } else {
                head.remaining -= left;
                self.unacknowledged -= left;
                left = 0;
            }
        }

        if left > 0 {
            return Err(ShellError::Protocol(format!(
                "received acknowledgement for {} bytes not sent",
                left
            )));
        }
        Ok(())
    }

    /// Bytes sent but not yet acknowledged.
    #[inline]
    pub fn unacknowledged(&self) -> usize {
        self.unacknowledged
    }

    /// Number of queued entries, sentinel included.
    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check if nothing awaits acknowledgment.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drop every entry, returning their tokens.
    pub fn drain(&mut self) -> Vec<T> {
        self.unacknowledged = 0;
        self.queue.drain(..).filter_map(|w| w.completion).collect()
    }
}

impl<T> Default for PendingWrites<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::HIGH_WATER_MARK;

    #[test]
    fn test_credit_creation() {
        let credit = SourceCredit::new(HIGH_WATER_MARK);
        assert_eq!(credit.high_water_mark(), 65536);
        assert_eq!(credit.outstanding(), 0);
        assert!(!credit.is_paused());
    }

    #[test]
    fn test_credit_pauses_once() {
        let mut credit = SourceCredit::new(HIGH_WATER_MARK);

        assert_eq!(credit.on_sent(60_000), None);
        assert_eq!(credit.on_sent(5_536), Some(FlowSignal::Pause));
        assert!(credit.is_paused());

        // Late chunks after the pause request do not pause again
        assert_eq!(credit.on_sent(1_000), None);
        assert_eq!(credit.outstanding(), 66_536);
    }

    #[test]
    fn test_credit_resumes_once_below_mark() {
        let mut credit = SourceCredit::new(HIGH_WATER_MARK);
        credit.on_sent(70_000);

        // Still at or above the mark
        assert_eq!(credit.on_ack(4_464).unwrap(), None);
        assert_eq!(credit.outstanding(), HIGH_WATER_MARK);

        assert_eq!(credit.on_ack(1).unwrap(), Some(FlowSignal::Resume));
        assert!(!credit.is_paused());
        assert_eq!(credit.on_ack(10_000).unwrap(), None);
        assert_eq!(credit.outstanding(), 55_535);
    }

    #[test]
    fn test_credit_ack_without_pause_never_resumes() {
        let mut credit = SourceCredit::new(100);
        credit.on_sent(50);
        assert_eq!(credit.on_ack(50).unwrap(), None);
    }

    #[test]
    fn test_credit_over_ack_is_protocol_error() {
        let mut credit = SourceCredit::new(100);
        credit.on_sent(10);

        let result = credit.on_ack(11);
        assert!(matches!(result, Err(ShellError::Protocol(_))));
        assert_eq!(credit.outstanding(), 10);
    }

    #[test]
    fn test_coalescer_acks_accepted_chunks() {
        let mut acks = AckCoalescer::new();
        assert_eq!(acks.on_delivered(100, true), Some(100));
        assert_eq!(acks.held(), 0);
        assert_eq!(acks.on_drained(), None);
    }

    #[test]
    fn test_coalescer_holds_until_drained() {
        let mut acks = AckCoalescer::new();

        assert_eq!(acks.on_delivered(16_384, false), None);
        assert_eq!(acks.on_delivered(200, false), None);
        assert_eq!(acks.held(), 16_584);

        assert_eq!(acks.on_drained(), Some(16_584));
        assert_eq!(acks.held(), 0);
        assert_eq!(acks.on_drained(), None);
    }

    #[test]
    fn test_pending_completes_in_order() {
        let mut pending = PendingWrites::new();
        pending.push(10, Some("a"));
        pending.push(20, Some("b"));
        pending.push(5, Some("c"));
        assert_eq!(pending.unacknowledged(), 35);

        let mut done = Vec::new();
        pending.acknowledge(15, &mut done).unwrap();
        assert_eq!(done, vec!["a"]);
        assert_eq!(pending.unacknowledged(), 20);

        // Exactly reaches the end of "b"
        pending.acknowledge(15, &mut done).unwrap();
        assert_eq!(done, vec!["a", "b"]);
        assert_eq!(pending.unacknowledged(), 5);

        pending.acknowledge(5, &mut done).unwrap();
        assert_eq!(done, vec!["a", "b", "c"]);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_pending_arbitrary_partitions() {
        let lengths = [3usize, 1, 16_384, 7, 250, 1];
        let total: usize = lengths.iter().sum();

        for step in [1usize, 2, 5, 64, 1_000, total] {
            let mut pending = PendingWrites::new();
            for (i, len) in lengths.iter().enumerate() {
                pending.push(*len, Some(i));
            }

            let mut done = Vec::new();
            let mut acked = 0;
            while acked < total {
                let count = step.min(total - acked);
                pending.acknowledge(count as u32, &mut done).unwrap();
                acked += count;
            }

            assert_eq!(done, (0..lengths.len()).collect::<Vec<_>>());
            assert!(pending.is_empty());
        }
    }

    #[test]
    fn test_pending_irregular_partitions() {
        let lengths = [3usize, 1, 16_384, 7, 250, 1];
        let partitions: [&[u32]; 3] = [
            &[2, 16_390, 1, 253],
            &[16_388, 7, 251],
            &[1, 1, 1, 1, 16_640, 2],
        ];

        for acks in partitions {
            let mut pending = PendingWrites::new();
            for (i, len) in lengths.iter().enumerate() {
                pending.push(*len, Some(i));
            }

            let mut done = Vec::new();
            for count in acks {
                pending.acknowledge(*count, &mut done).unwrap();
            }

            assert_eq!(done, (0..lengths.len()).collect::<Vec<_>>());
            assert!(pending.is_empty());
        }

        // Completions fire as soon as their last byte is acknowledged
        let mut pending = PendingWrites::new();
        for (i, len) in lengths.iter().enumerate() {
            pending.push(*len, Some(i));
        }
        let mut done = Vec::new();
        pending.acknowledge(2, &mut done).unwrap();
        assert!(done.is_empty());
        pending.acknowledge(16_390, &mut done).unwrap();
        assert_eq!(done, vec![0, 1, 2]);
        pending.acknowledge(1, &mut done).unwrap();
        assert_eq!(done, vec![0, 1, 2]);
        pending.acknowledge(253, &mut done).unwrap();
        assert_eq!(done, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_pending_untracked_frames_complete_silently() {
        // A write split into three frames only reports on the last one
        let mut pending = PendingWrites::new();
        pending.push(16_384, None);
        pending.push(16_384, None);
        pending.push(100, Some("write"));

        let mut done = Vec::new();
        pending.acknowledge(32_768, &mut done).unwrap();
        assert!(done.is_empty());
        pending.acknowledge(100, &mut done).unwrap();
        assert_eq!(done, vec!["write"]);
    }

    #[test]
    fn test_pending_over_ack_is_protocol_error() {
        let mut pending = PendingWrites::new();
        pending.push(10, Some(1));
        pending.push(10, Some(2));

        let mut done = Vec::new();
        let result = pending.acknowledge(25, &mut done);

        assert!(matches!(result, Err(ShellError::Protocol(_))));
        // Entries covered by the ack still complete
        assert_eq!(done, vec![1, 2]);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_pending_eof_sentinel() {
        let mut pending = PendingWrites::new();
        pending.push(4, Some("data"));
        pending.push_eof(Some("eof"));

        let mut done = Vec::new();
        pending.acknowledge(4, &mut done).unwrap();
        pending.acknowledge(0, &mut done).unwrap();
        assert_eq!(done, vec!["data", "eof"]);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_pending_zero_ack_before_data_acked() {
        let mut pending = PendingWrites::new();
        pending.push(4, Some("data"));
        pending.push_eof(Some("eof"));

        let mut done = Vec::new();
        let result = pending.acknowledge(0, &mut done);
        assert!(matches!(result, Err(ShellError::Protocol(_))));
        assert!(done.is_empty());
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn test_pending_zero_ack_on_empty_queue() {
        let mut pending: PendingWrites<()> = PendingWrites::new();
        let mut done = Vec::new();
        assert!(pending.acknowledge(0, &mut done).is_err());
    }

    #[test]
    fn test_pending_nonzero_ack_does_not_release_sentinel() {
        let mut pending = PendingWrites::new();
        pending.push(4, Some("data"));
        pending.push_eof(Some("eof"));

        let mut done = Vec::new();
        let result = pending.acknowledge(5, &mut done);
        assert!(result.is_err());
        assert_eq!(done, vec!["data"]);
        assert_eq!(pending.len(), 1);

        pending.acknowledge(0, &mut done).unwrap();
        assert_eq!(done, vec!["data", "eof"]);
    }

    #[test]
    fn test_pending_drain() {
        let mut pending = PendingWrites::new();
        pending.push(4, Some(1));
        pending.push(4, None);
        pending.push_eof(Some(2));

        assert_eq!(pending.drain(), vec![1, 2]);
        assert!(pending.is_empty());
        assert_eq!(pending.unacknowledged(), 0);
    }
}
