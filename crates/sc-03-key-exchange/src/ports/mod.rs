//! Ports (hexagonal architecture) for Key Exchange.

pub mod inbound;
pub mod outbound;
