//! Inbound ports (API) for Decryption.

use shared_types::{Address, StreamMessage};

/// Decryption gate of one subscription.
pub trait DecryptionGate: Send + Sync {
    /// Decrypt and deliver an in-order message, or hold it until its key arrives.
    fn handle(&self, msg: StreamMessage);

    /// Keys of `publisher_id` became available: release their waiting messages.
    fn on_new_keys_added(&self, publisher_id: Address, key_ids: &[String]);

    /// A key request of ours was answered with an error.
    fn on_key_exchange_failed(&self, publisher_id: Address, key_ids: &[String], reason: &str);

    /// Messages still waiting for keys.
    fn pending_messages(&self) -> usize;

    /// Cancel all key-request timers.
    fn stop(&self);
}
