//! Inbound ports (API) for Subscriptions.

use std::sync::Arc;

use shared_types::StreamMessage;

use crate::domain::{DeliveryMode, RequestId, SubscriptionId};
use crate::events::SubscriptionError;
use crate::ports::outbound::SubscriptionEvents;

/// Application-facing subscription management.
pub trait SubscriptionApi: Send + Sync {
    fn subscribe(
        &self,
        stream_id: &str,
        partition: u32,
        mode: DeliveryMode,
        events: Arc<dyn SubscriptionEvents>,
    ) -> Result<SubscriptionId, SubscriptionError>;

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), SubscriptionError>;

    /// Recreate a subscription after reconnecting, continuing every chain from
    /// where it stopped.
    fn resubscribe(&self, id: SubscriptionId) -> Result<(), SubscriptionError>;
}

/// What the transport reports back.
pub trait TransportListener: Send + Sync {
    /// A real-time message (or a message on the local key exchange stream).
    fn on_message(&self, msg: StreamMessage);

    /// A message answering a resend request.
    fn on_resent_message(&self, request_id: RequestId, msg: StreamMessage);

    /// The resend request completed.
    fn on_resend_done(&self, request_id: RequestId);

    fn on_subscribed(&self, stream_id: &str, partition: u32);

    fn on_unsubscribed(&self, stream_id: &str, partition: u32);

    /// The connection was re-established. Pending resends and
    /// acknowledgements of the old connection are lost.
    fn on_reconnected(&self);
}
