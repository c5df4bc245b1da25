//! Error types for the Key Exchange subsystem.

use shared_crypto::CryptoError;
use shared_types::{MessageType, ValidationError};
use thiserror::Error;

/// Key exchange errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyExchangeError {
    #[error("Protocol message rejected: {0}")]
    Validation(#[from] ValidationError),

    #[error("Malformed protocol payload: {0}")]
    Decode(String),

    #[error("Group key {key_id} of stream {stream_id} not found")]
    GroupKeyNotFound { stream_id: String, key_id: String },

    #[error("Key exchange crypto failure: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Failed to publish protocol message: {0}")]
    Publish(String),

    #[error("Not a key exchange message: {0:?}")]
    UnexpectedMessageType(MessageType),
}
