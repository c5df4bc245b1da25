//! Ports (hexagonal architecture) for Subscriptions.

pub mod inbound;
pub mod outbound;
