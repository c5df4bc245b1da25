//! Outbound ports (SPI) for Subscriptions.

use sc_02_decryption::DecryptionError;
use shared_types::StreamMessage;

use crate::domain::{ControlMessage, SubscriptionId};
use crate::events::SubscriptionError;

/// Sends control messages to the network.
///
/// Called while pipeline locks are held. Implementations must hand messages
/// off (queue, channel) and never call back into the client synchronously.
pub trait Transport: Send + Sync {
    /// # Errors
    ///
    /// Implementations report failures as `SubscriptionError::Transport`.
    fn send(&self, control: ControlMessage) -> Result<(), SubscriptionError>;
}

/// Application callbacks of one subscription.
///
/// `on_message` and `on_unable_to_decrypt` run under the subscription's
/// pipeline locks, in chain order. They must not call back into the
/// subscription service synchronously.
pub trait SubscriptionEvents: Send + Sync {
    fn on_message(&self, subscription: SubscriptionId, msg: StreamMessage);

    fn on_unable_to_decrypt(&self, subscription: SubscriptionId, msg: StreamMessage, error: DecryptionError);

    /// A historical subscription delivered everything it asked for.
    fn on_done(&self, _subscription: SubscriptionId) {}

    /// A fatal error hit the subscription.
    fn on_error(&self, _subscription: SubscriptionId, _error: &SubscriptionError) {}
}
