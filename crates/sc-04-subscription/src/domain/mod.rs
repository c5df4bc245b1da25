//! # Domain Layer for Subscriptions
//!
//! - **control**: control messages sent through the transport
//! - **state**: subscription lifecycle state machine
//! - **value_objects**: ids, delivery modes, `ClientConfig`

mod control;
mod state;
mod value_objects;

pub use control::*;
pub use state::*;
pub use value_objects::*;
