//! # Chain State
//!
//! Ordering state of one `(publisher, msg chain id)` pair.
//!
//! ## Ordering Rule
//!
//! A message is *next* when:
//!
//! 1. nothing has been delivered yet, or
//! 2. its declared predecessor is the last delivered message, or
//! 3. its declared predecessor was already passed (or it declares none) and
//!    it is newer than the last delivered message.
//!
//! Messages at or before the last delivered reference are stale and dropped.
//! Everything else waits in a queue ordered by `MessageRef`.

use std::collections::BTreeMap;

use shared_scheduler::{TimerId, TimerOwner, TimerSlot};
use shared_types::{ChainId, MessageRef, StreamMessage};

use super::GapRange;

/// Mutable state of one chain, guarded by the chain's lock.
#[derive(Debug)]
pub struct ChainState {
    chain_id: ChainId,
    last_delivered: Option<MessageRef>,
    queue: BTreeMap<MessageRef, StreamMessage>,
    pub(crate) gap_timer: TimerSlot,
    pub(crate) gap_request_count: u32,
    pub(crate) halted: bool,
    pub(crate) stopped: bool,
}

impl ChainState {
    pub fn new(chain_id: ChainId, last_delivered: Option<MessageRef>) -> Self {
        Self {
            chain_id,
            last_delivered,
            queue: BTreeMap::new(),
            gap_timer: TimerSlot::new(),
            gap_request_count: 0,
            halted: false,
            stopped: false,
        }
    }

    pub fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    pub fn last_delivered(&self) -> Option<MessageRef> {
        self.last_delivered
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Whether a gap is currently being chased.
    pub fn has_gap(&self) -> bool {
        self.gap_timer.is_active()
    }

    /// Already delivered or older than the last delivered message.
    pub fn is_stale(&self, msg: &StreamMessage) -> bool {
        self.last_delivered
            .is_some_and(|last| msg.message_ref() <= last)
    }

    /// Whether `msg` may be delivered right now.
    pub fn is_next(&self, msg: &StreamMessage) -> bool {
        let Some(last) = self.last_delivered else {
            return true;
        };
        match msg.prev_msg_ref() {
            Some(prev) if prev == last => true,
            Some(prev) => prev < last && msg.message_ref() > last,
            None => msg.message_ref() > last,
        }
    }

    pub fn is_queued(&self, msg: &StreamMessage) -> bool {
        self.queue.contains_key(&msg.message_ref())
    }

    pub fn enqueue(&mut self, msg: StreamMessage) {
        self.queue.insert(msg.message_ref(), msg);
    }

    /// Mark `msg` delivered and hand it to `deliver`.
    pub fn deliver(&mut self, msg: StreamMessage, deliver: &mut impl FnMut(StreamMessage)) {
        self.last_delivered = Some(msg.message_ref());
        deliver(msg);
    }

    /// Deliver queued messages while the head is next; discard stale heads.
    ///
    /// Returns the number of messages delivered. Clears the gap once the
    /// queue is empty.
    pub fn drain(&mut self, deliver: &mut impl FnMut(StreamMessage)) -> usize {
        let mut delivered = 0;
        while let Some(head) = self.queue.values().next() {
            if self.is_stale(head) {
                self.queue.pop_first();
            } else if self.is_next(head) {
                if let Some((_, msg)) = self.queue.pop_first() {
                    self.deliver(msg, deliver);
                    delivered += 1;
                }
            } else {
                break;
            }
        }
        if self.queue.is_empty() {
            self.clear_gap();
        }
        delivered
    }

    /// Cancel gap tracking.
    pub fn clear_gap(&mut self) {
        self.gap_timer.cancel();
        self.gap_request_count = 0;
    }

    /// Drop every queued message and the gap. Returns how many were dropped.
    pub fn reset_queue(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        self.clear_gap();
        dropped
    }

    /// Move the last delivered reference forward to `to` (never backward).
    pub fn advance_to(&mut self, to: MessageRef) {
        if self.last_delivered.map_or(true, |last| to > last) {
            self.last_delivered = Some(to);
        }
    }

    /// The range missing before the queue head, if there is a gap.
    pub fn gap_range(&self, stream_id: &str, partition: u32) -> Option<GapRange> {
        let head = self.queue.values().next()?;
        let to = head.prev_msg_ref().unwrap_or_else(|| head.message_ref());
        let from = self
            .last_delivered
            .map_or(to, |last| last.next_in_sequence());
        Some(GapRange {
            stream_id: stream_id.to_string(),
            partition,
            from,
            to,
            publisher_id: self.chain_id.publisher_id,
            msg_chain_id: self.chain_id.msg_chain_id.clone(),
        })
    }
}

impl TimerOwner for ChainState {
    fn owns_timer(&self, id: TimerId) -> bool {
        !self.stopped && self.gap_timer.is_current(id)
    }
}
