//! Configuration for the key exchange.

use std::time::Duration;

use shared_types::{Address, KEY_EXCHANGE_STREAM_PREFIX};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyExchangeConfig {
    /// Revoked subscribers that make a proactive rekey worthwhile.
    pub revocation_threshold: usize,
    /// Minimum time between two revocation checks.
    pub revocation_cooldown: Duration,
    /// Modulus size of the local RSA key pair.
    pub rsa_key_bits: usize,
    /// Prefix of per-address key exchange inbox streams.
    pub key_exchange_prefix: String,
}

impl Default for KeyExchangeConfig {
    fn default() -> Self {
        Self {
            revocation_threshold: 5,
            revocation_cooldown: Duration::from_secs(10 * 60),
            rsa_key_bits: 2048,
            key_exchange_prefix: KEY_EXCHANGE_STREAM_PREFIX.to_string(),
        }
    }
}

impl KeyExchangeConfig {
    /// Inbox stream of `address`.
    pub fn inbox_stream_id(&self, address: &Address) -> String {
        format!("{}{}", self.key_exchange_prefix, address)
    }

    pub fn is_inbox(&self, stream_id: &str) -> bool {
        stream_id.starts_with(&self.key_exchange_prefix)
    }

    /// Owner of an inbox stream.
    pub fn inbox_owner(&self, stream_id: &str) -> Option<Address> {
        stream_id
            .strip_prefix(&self.key_exchange_prefix)
            .and_then(|address| address.parse().ok())
    }
}
