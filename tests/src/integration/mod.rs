//! Cross-subsystem flows.

pub mod harness;

mod flows;
mod key_rotation;
