//! Error types for the Message Ordering subsystem.

use shared_types::{ChainId, MessageRef};
use thiserror::Error;

/// Ordering errors.
///
/// Stale and duplicate messages are not errors; they are dropped silently.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderingError {
    #[error("Out-of-order queue of chain {chain} is full (max: {max})")]
    QueueFull { chain: ChainId, max: usize },

    #[error("Gap in chain {chain} from {from} to {to} not filled after {attempts} resend requests")]
    GapFillFailed {
        chain: ChainId,
        from: MessageRef,
        to: MessageRef,
        attempts: u32,
    },

    #[error("Chain {0} halted after an unrecoverable gap")]
    ChainHalted(ChainId),
}

impl OrderingError {
    /// The chain the error belongs to.
    pub fn chain(&self) -> &ChainId {
        match self {
            OrderingError::QueueFull { chain, .. }
            | OrderingError::GapFillFailed { chain, .. }
            | OrderingError::ChainHalted(chain) => chain,
        }
    }
}
