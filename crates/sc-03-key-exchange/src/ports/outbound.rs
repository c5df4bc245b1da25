//! Outbound ports (SPI) for Key Exchange.

use shared_types::{Address, StreamMessage, ValidationError};

use crate::domain::GroupKeyErrorResponse;
use crate::events::KeyExchangeError;

/// Sends signed protocol messages to their inbox stream.
pub trait ProtocolPublisher: Send + Sync {
    /// # Errors
    ///
    /// Implementations report failures as `KeyExchangeError::Publish`.
    fn publish(&self, msg: StreamMessage) -> Result<(), KeyExchangeError>;
}

/// Publish / subscribe permissions of addresses on streams.
///
/// Implementations cache and rate-limit lookups on their own.
pub trait PermissionOracle: Send + Sync {
    fn is_valid_publisher(&self, stream_id: &str, address: &Address) -> bool;

    fn is_valid_subscriber(&self, stream_id: &str, address: &Address) -> bool;

    /// Drop cached subscriber lists of `stream_id` before the next check.
    fn refresh_subscribers(&self, _stream_id: &str) {}
}

/// Notified when keys arrive or a key request is refused.
pub trait NewKeysListener: Send + Sync {
    fn on_new_keys_added(&self, stream_id: &str, publisher_id: Address, key_ids: &[String]);

    fn on_key_exchange_failed(
        &self,
        _stream_id: &str,
        _publisher_id: Address,
        _failure: &GroupKeyErrorResponse,
    ) {
    }
}

/// Checks signature, permissions and shape of incoming messages.
pub trait MessageValidator: Send + Sync {
    fn validate(&self, msg: &StreamMessage) -> Result<(), ValidationError>;
}
