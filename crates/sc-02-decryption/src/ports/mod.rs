//! Ports (hexagonal architecture) for Decryption.

pub mod inbound;
pub mod outbound;
