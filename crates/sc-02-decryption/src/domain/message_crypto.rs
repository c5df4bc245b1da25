//! Content encryption of stream messages.
//!
//! Messages are never modified in place; both directions build a new copy.

use shared_crypto::{CryptoError, GroupKey};
use shared_types::{EncryptionType, StreamMessage};

use crate::events::DecryptionError;

/// Encrypt the content of `msg` under `key`, optionally attaching `next_key`
/// (encrypted under `key`) to announce a rotation.
///
/// Used on the publishing side before the message is signed.
pub fn encrypt_stream_message(
    msg: &StreamMessage,
    key: &GroupKey,
    next_key: Option<&GroupKey>,
) -> Result<StreamMessage, CryptoError> {
    let content = key.encrypt(msg.content())?;
    let new_group_key = next_key.map(|next| key.encrypt_next_key(next)).transpose()?;

    Ok(msg
        .to_builder()
        .content(content)
        .encryption(EncryptionType::Aes, Some(key.id().to_string()))
        .new_group_key(new_group_key)
        .signature(None)
        .build())
}

/// Decrypt an AES-encrypted data message with `key`.
///
/// The returned copy carries plaintext content and no encryption metadata.
/// An attached next key is left for the caller to process.
pub fn decrypt_stream_message(
    msg: &StreamMessage,
    key: &GroupKey,
) -> Result<StreamMessage, DecryptionError> {
    if msg.encryption_type() != EncryptionType::Aes {
        return Err(DecryptionError::UnsupportedEncryption(msg.encryption_type()));
    }
    let plaintext = key
        .decrypt(msg.content())
        .map_err(|e| DecryptionError::crypto(key.id(), e))?;

    Ok(msg
        .to_builder()
        .content(plaintext)
        .encryption(EncryptionType::None, None)
        .build())
}
