//! # Domain Layer for Decryption
//!
//! - **message_crypto**: encrypting and decrypting `StreamMessage` content
//! - **pending**: per key id bookkeeping of messages waiting for their key
//! - **value_objects**: `DecryptionConfig`

mod message_crypto;
mod pending;
mod value_objects;

pub use message_crypto::*;
pub use pending::*;
pub use value_objects::*;
