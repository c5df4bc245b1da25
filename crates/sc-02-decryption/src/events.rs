//! Error types for the Decryption subsystem.

use shared_crypto::CryptoError;
use shared_types::EncryptionType;
use thiserror::Error;

/// Reasons a message could not be decrypted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecryptionError {
    #[error("Group key {key_id} of stream {stream_id} is not available")]
    GroupKeyMissing { stream_id: String, key_id: String },

    #[error("Unable to decrypt message with group key {key_id}: {reason}")]
    UnableToDecrypt { key_id: String, reason: String },

    #[error("Unsupported encryption for data messages: {0:?}")]
    UnsupportedEncryption(EncryptionType),
}

impl DecryptionError {
    pub(crate) fn crypto(key_id: &str, error: CryptoError) -> Self {
        DecryptionError::UnableToDecrypt {
            key_id: key_id.to_string(),
            reason: error.to_string(),
        }
    }
}
