//! Ports (hexagonal architecture) for Message Ordering.

pub mod inbound;
pub mod outbound;
