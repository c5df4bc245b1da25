//! Configuration and value objects for message ordering.

use std::fmt;
use std::time::Duration;

use shared_types::{Address, ChainId, MessageRef};

/// What a chain does once a gap stays unfilled after the last resend request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GapFillFailurePolicy {
    /// Halt the chain and report the gap as a fatal error.
    #[default]
    Fatal,
    /// Log, skip past the gap and continue with the queued messages.
    Skip,
}

/// What a chain does when an out-of-order message arrives at a full queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueueOverflowPolicy {
    /// Reject the message with an error.
    #[default]
    Strict,
    /// Drop everything queued and restart from the new message.
    Reset,
}

/// Ordering configuration, shared by every chain of a multiplexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderingConfig {
    /// Delay between detecting a gap and the first resend request.
    pub propagation_timeout: Duration,
    /// Delay between subsequent resend requests for the same gap.
    pub resend_timeout: Duration,
    /// Resend requests sent for one gap before it is declared unrecoverable.
    pub max_gap_requests: u32,
    /// Capacity of the out-of-order queue of one chain.
    pub max_queue_size: usize,
    pub gap_fill_failure: GapFillFailurePolicy,
    pub queue_overflow: QueueOverflowPolicy,
}

impl Default for OrderingConfig {
    fn default() -> Self {
        Self {
            propagation_timeout: Duration::from_secs(5),
            resend_timeout: Duration::from_secs(5),
            max_gap_requests: 10,
            max_queue_size: 10_000,
            gap_fill_failure: GapFillFailurePolicy::Fatal,
            queue_overflow: QueueOverflowPolicy::Strict,
        }
    }
}

impl OrderingConfig {
    /// Lossy configuration: unrecoverable gaps are skipped and a full queue is
    /// reset instead of failing.
    pub fn skipping() -> Self {
        Self {
            gap_fill_failure: GapFillFailurePolicy::Skip,
            queue_overflow: QueueOverflowPolicy::Reset,
            ..Default::default()
        }
    }
}

/// Missing range of a chain, inclusive on both ends.
///
/// `from` follows the last delivered message; `to` is the declared
/// predecessor of the first queued message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GapRange {
    pub stream_id: String,
    pub partition: u32,
    pub from: MessageRef,
    pub to: MessageRef,
    pub publisher_id: Address,
    pub msg_chain_id: String,
}

impl GapRange {
    pub fn chain_id(&self) -> ChainId {
        ChainId::new(self.publisher_id, self.msg_chain_id.clone())
    }
}

impl fmt::Display for GapRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{} {}/{} [{} .. {}]",
            self.stream_id, self.partition, self.publisher_id, self.msg_chain_id, self.from, self.to
        )
    }
}

/// Result of offering a message to a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Delivered together with this many queued successors.
    Delivered { drained: usize },
    /// Held back until its predecessor arrives.
    Queued,
    /// Already delivered, stale, or already queued.
    Dropped,
}
