//! One receive pipeline: ordering, then decryption, then the application.
//!
//! ```text
//! route ──→ [ChainMultiplexer] ──in order──→ [DecryptionStage] ──→ [PendingKeyRegistry] ──→ [EventsAdapter]
//!                                                  │ announce on data stream
//!                                                  ↓
//!                                          [KeyExchangeCoordinator]
//! ```
//!
//! The two pipelines of a combined subscription share one registry, so
//! messages waiting for a key are released in the order they arrived.
//!
//! Lock order: chain lock, then registry lock. Registry locks are leaves.

use std::collections::HashMap;
use std::sync::Arc;

use sc_01_message_ordering::{AddOutcome, ChainMultiplexer, MessageDeliverer, MessageOrderingApi, OrderingError};
use sc_02_decryption::{DecryptedMessageHandler, DecryptionError, DecryptionGate, KeyRequester, PendingKeyRegistry};
use sc_03_key_exchange::{KeyExchangeApi, KeyExchangeCoordinator};
use shared_types::{Address, ChainId, MessageRef, MessageType, StreamMessage};
use tracing::{debug, warn};

use crate::domain::SubscriptionId;
use crate::ports::outbound::SubscriptionEvents;

/// Which pipeline of a subscription a resend answers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum PipelineKind {
    /// Real-time messages, or the resend of a historical subscription.
    Primary,
    /// The initial resend of a combined subscription.
    History,
}

pub(crate) struct Pipeline {
    ordering: ChainMultiplexer,
    decryption: Arc<PendingKeyRegistry>,
}

impl Pipeline {
    pub(crate) fn new(ordering: ChainMultiplexer, decryption: Arc<PendingKeyRegistry>) -> Self {
        Self { ordering, decryption }
    }

    pub(crate) fn route(&self, msg: StreamMessage) -> Result<AddOutcome, OrderingError> {
        let outcome = self.ordering.route(msg);
        match &outcome {
            Ok(AddOutcome::Dropped) => stream_telemetry::DUPLICATES_DROPPED.inc(),
            Err(OrderingError::QueueFull { .. }) => stream_telemetry::QUEUE_OVERFLOWS.inc(),
            _ => {}
        }
        outcome
    }

    pub(crate) fn snapshot(&self) -> HashMap<ChainId, MessageRef> {
        self.ordering.snapshot()
    }

    pub(crate) fn seed(&self, snapshot: &HashMap<ChainId, MessageRef>) {
        self.ordering.seed(snapshot);
    }

    /// Nothing waits for a predecessor or a key.
    pub(crate) fn is_drained(&self) -> bool {
        self.ordering.is_drained() && self.decryption.pending_messages() == 0
    }

    pub(crate) fn queued_messages(&self) -> usize {
        self.ordering.queued_messages()
    }

    pub(crate) fn pending_decryption(&self) -> usize {
        self.decryption.pending_messages()
    }

    /// Stop gap-fill timers. Key requests keep running.
    pub(crate) fn stop_ordering(&self) {
        self.ordering.stop();
    }

    pub(crate) fn stop(&self) {
        self.ordering.stop();
        self.decryption.stop();
    }

    pub(crate) fn on_new_keys_added(&self, publisher_id: Address, key_ids: &[String]) {
        self.decryption.on_new_keys_added(publisher_id, key_ids);
    }

    pub(crate) fn on_key_exchange_failed(&self, publisher_id: Address, key_ids: &[String], reason: &str) {
        self.decryption.on_key_exchange_failed(publisher_id, key_ids, reason);
    }
}

// =============================================================================
// ADAPTERS
// =============================================================================

/// Ordering output: data messages go to decryption, key announces published
/// on the data stream go to the key exchange.
pub(crate) struct DecryptionStage {
    pub(crate) registry: Arc<PendingKeyRegistry>,
    pub(crate) key_exchange: Arc<KeyExchangeCoordinator>,
}

impl MessageDeliverer for DecryptionStage {
    fn deliver(&self, msg: StreamMessage) {
        match msg.message_type() {
            MessageType::Message => self.registry.handle(msg),
            MessageType::GroupKeyAnnounce => {
                if let Err(e) = self.key_exchange.handle_protocol_message(&msg) {
                    warn!(
                        stream_id = %msg.stream_id(),
                        publisher_id = %msg.publisher_id(),
                        "Rejected group key announce: {}",
                        e
                    );
                }
            }
            other => debug!(
                stream_id = %msg.stream_id(),
                message_type = ?other,
                "Ignoring key exchange message on a data stream"
            ),
        }
    }
}

/// Decryption output to the application.
pub(crate) struct EventsAdapter {
    pub(crate) subscription: SubscriptionId,
    pub(crate) events: Arc<dyn SubscriptionEvents>,
}

impl DecryptedMessageHandler for EventsAdapter {
    fn on_message(&self, msg: StreamMessage) {
        stream_telemetry::MESSAGES_DELIVERED.inc();
        self.events.on_message(self.subscription, msg);
    }

    fn on_unable_to_decrypt(&self, msg: StreamMessage, error: DecryptionError) {
        stream_telemetry::DECRYPTION_FAILURES.inc();
        warn!(
            subscription = %self.subscription,
            stream_id = %msg.stream_id(),
            publisher_id = %msg.publisher_id(),
            "Unable to decrypt message: {}",
            error
        );
        self.events.on_unable_to_decrypt(self.subscription, msg, error);
    }
}

/// Counts key requests on their way to the key exchange.
pub(crate) struct MeteredKeyRequester {
    pub(crate) inner: Arc<KeyExchangeCoordinator>,
}

impl KeyRequester for MeteredKeyRequester {
    fn request_keys(&self, stream_id: &str, publisher_id: Address, key_ids: Vec<String>) {
        stream_telemetry::KEY_REQUESTS.inc();
        self.inner.request_keys(stream_id, publisher_id, key_ids);
    }
}
