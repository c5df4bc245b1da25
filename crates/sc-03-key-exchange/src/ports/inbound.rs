//! Inbound ports (API) for Key Exchange.

use shared_crypto::GroupKey;
use shared_types::StreamMessage;

use crate::events::KeyExchangeError;

/// Key exchange operations of one client.
pub trait KeyExchangeApi: Send + Sync {
    /// Validate and handle a request / response / announce / error-response.
    fn handle_protocol_message(&self, msg: &StreamMessage) -> Result<(), KeyExchangeError>;

    /// Replace the current key of `stream_id` and announce it to every cached
    /// subscriber that is still valid; the others are revoked.
    ///
    /// With `use_cached_subscribers` false the permission oracle refreshes its
    /// subscriber lists first.
    fn rekey(&self, stream_id: &str, use_cached_subscribers: bool) -> Result<GroupKey, KeyExchangeError>;

    /// Whether enough cached subscribers lost their permission to warrant a
    /// rekey. Checks at most once per cooldown period.
    fn key_revocation_needed(&self, stream_id: &str) -> bool;
}
