//! Inbound ports (API) for Message Ordering.

use std::collections::HashMap;

use shared_types::{ChainId, MessageRef, StreamMessage};

use crate::domain::AddOutcome;
use crate::events::OrderingError;

/// Ordering of every chain of one stream partition.
pub trait MessageOrderingApi: Send + Sync {
    /// Offer a message to its chain.
    fn route(&self, msg: StreamMessage) -> Result<AddOutcome, OrderingError>;

    /// Last delivered reference of every chain that delivered something.
    fn snapshot(&self) -> HashMap<ChainId, MessageRef>;

    /// Continue from previously recorded progress.
    ///
    /// Existing chains move forward; chains created later start from the
    /// seeded reference.
    fn seed(&self, snapshot: &HashMap<ChainId, MessageRef>);

    /// Whether no chain holds queued messages.
    fn is_drained(&self) -> bool;

    /// Cancel every gap timer. Messages still queued stay undelivered.
    fn stop(&self);
}
