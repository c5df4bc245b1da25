//! RSA public keys of subscribers, learned from their key requests.
//!
//! Rekeying announces the new key to every cached subscriber that is still
//! valid; the rest are revoked by removing them here.

use std::collections::HashMap;

use shared_types::Address;

#[derive(Debug, Default)]
pub struct SubscriberKeyCache {
    streams: HashMap<String, HashMap<Address, String>>,
}

impl SubscriberKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember `public_key_pem` for `subscriber`. Returns whether it was new
    /// or replaced a different key.
    pub fn remember(&mut self, stream_id: &str, subscriber: Address, public_key_pem: &str) -> bool {
        let keys = self.streams.entry(stream_id.to_string()).or_default();
        match keys.get(&subscriber) {
            Some(existing) if existing == public_key_pem => false,
            _ => {
                keys.insert(subscriber, public_key_pem.to_string());
                true
            }
        }
    }

    pub fn get(&self, stream_id: &str, subscriber: &Address) -> Option<&str> {
        self.streams
            .get(stream_id)
            .and_then(|keys| keys.get(subscriber))
            .map(String::as_str)
    }

    /// Cached subscribers of a stream with their keys.
    pub fn subscribers(&self, stream_id: &str) -> Vec<(Address, String)> {
        self.streams
            .get(stream_id)
            .map(|keys| keys.iter().map(|(a, k)| (*a, k.clone())).collect())
            .unwrap_or_default()
    }

    /// Forget `revoked` for `stream_id`.
    pub fn revoke(&mut self, stream_id: &str, revoked: &[Address]) {
        if let Some(keys) = self.streams.get_mut(stream_id) {
            for address in revoked {
                keys.remove(address);
            }
        }
    }

    pub fn len(&self, stream_id: &str) -> usize {
        self.streams.get(stream_id).map_or(0, HashMap::len)
    }
}
