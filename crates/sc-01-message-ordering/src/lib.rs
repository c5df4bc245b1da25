//! # Message Ordering Subsystem (sc-01)
//!
//! Delivers the messages of every publisher chain in order, holding back
//! out-of-order arrivals and chasing gaps with resend requests.
//!
//! ## Architecture Role
//!
//! ```text
//! [Transport] ──msg──→ [ChainMultiplexer] ──(publisher, chain)──→ [MessageChain]
//!                                                                     │
//!                                  in order ←────────────────────────┤
//!                            [Decryption (2)]                         │ gap
//!                                                                     ↓
//!                                                     [GapHandler] ──→ ResendRange
//! ```
//!
//! ## Guarantees
//!
//! - Strictly increasing delivery per chain; duplicates and stale messages are dropped
//! - No ordering across chains or publishers
//! - Bounded memory: the out-of-order queue of a chain is capped
//! - A gap is retried a bounded number of times before it is declared unrecoverable

pub mod chain;
pub mod domain;
pub mod events;
pub mod ports;
pub mod service;

#[cfg(test)]
mod test_support;

pub use chain::MessageChain;
pub use domain::{AddOutcome, GapFillFailurePolicy, GapRange, OrderingConfig, QueueOverflowPolicy};
pub use events::OrderingError;
pub use ports::inbound::MessageOrderingApi;
pub use ports::outbound::{GapHandler, MessageDeliverer};
pub use service::ChainMultiplexer;
