//! # Shared Types Crate
//!
//! This crate contains the message model every subsystem of the stream client
//! agrees on.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: `MessageRef`, `MessageId` and `StreamMessage`
//!   are defined once here and passed through the whole receive pipeline.
//! - **Immutable Messages**: a `StreamMessage` is never mutated after creation;
//!   changed copies are produced through `StreamMessageBuilder`.
//! - **Total Order per Chain**: `MessageRef` orders by timestamp, then by
//!   sequence number.

pub mod entities;
pub mod errors;
pub mod key_exchange;
pub mod message;

pub use entities::*;
pub use errors::*;
pub use key_exchange::*;
pub use message::*;
