//! Outbound ports (SPI) for Message Ordering.
//!
//! Both ports may be called while a chain's lock is held (`deliver`) or from
//! a timer task (`GapHandler`). Implementations must not feed messages back
//! into the same chain synchronously.

use shared_types::StreamMessage;

use crate::domain::GapRange;
use crate::events::OrderingError;

/// Receives messages in chain order.
///
/// Invoked under the chain's lock: one call at a time per chain.
pub trait MessageDeliverer: Send + Sync {
    fn deliver(&self, msg: StreamMessage);
}

/// Turns gaps into resend requests.
pub trait GapHandler: Send + Sync {
    /// Ask for the messages in `range` to be sent again.
    fn request_gap_fill(&self, range: &GapRange);

    /// A gap stayed open after the last allowed resend request.
    ///
    /// Called with `OrderingError::GapFillFailed` under both failure policies.
    fn gap_fill_failed(&self, _error: &OrderingError) {}
}
