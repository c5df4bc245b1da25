//! Configuration for the decryption gate.

use std::time::Duration;

/// Key-request retry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptionConfig {
    /// Delay between key requests for the same key id.
    pub key_request_interval: Duration,
    /// Key requests sent per key id, the immediate one included.
    pub max_key_requests: u32,
}

impl Default for DecryptionConfig {
    fn default() -> Self {
        Self {
            key_request_interval: Duration::from_secs(5),
            max_key_requests: 5,
        }
    }
}
