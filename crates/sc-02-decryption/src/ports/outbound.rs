//! Outbound ports (SPI) for Decryption.

use shared_crypto::GroupKey;
use shared_types::{Address, EncryptedGroupKey, StreamMessage};

use crate::events::DecryptionError;

/// Asks a publisher for group keys (sends a key request on the wire).
pub trait KeyRequester: Send + Sync {
    fn request_keys(&self, stream_id: &str, publisher_id: Address, key_ids: Vec<String>);
}

/// Application-facing delivery.
///
/// Called under the gate's lock, in chain order.
pub trait DecryptedMessageHandler: Send + Sync {
    fn on_message(&self, msg: StreamMessage);

    /// Terminal decryption failure. The message is not retried.
    fn on_unable_to_decrypt(&self, msg: StreamMessage, error: DecryptionError);
}

/// Receives a next group key attached to a data message, together with the
/// key the message was decrypted with.
pub trait NextGroupKeyHandler: Send + Sync {
    fn on_next_group_key(
        &self,
        stream_id: &str,
        publisher_id: Address,
        encrypted: &EncryptedGroupKey,
        current: &GroupKey,
    );
}
