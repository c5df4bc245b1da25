//! # Domain Layer for Message Ordering
//!
//! Pure ordering logic with no I/O: the per-chain state machine and the
//! configuration it runs under.
//!
//! ## Contents
//!
//! - **chain_state**: `ChainState` (last delivered ref, out-of-order queue, gap bookkeeping)
//! - **value_objects**: `OrderingConfig`, policies, `GapRange`, `AddOutcome`

mod chain_state;
mod value_objects;

pub use chain_state::*;
pub use value_objects::*;
