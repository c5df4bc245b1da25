//! Publish path: encrypt under the stream's current group key, chain, sign,
//! hand to the transport.
//!
//! Before each publish the key exchange decides whether enough subscribers
//! lost their permission to make a rekey worthwhile.

use std::sync::Arc;

use sc_02_decryption::encrypt_stream_message;
use sc_03_key_exchange::{KeyExchangeApi, KeyExchangeCoordinator, ProtocolMessageFactory};
use shared_crypto::{GroupKey, GroupKeyStore};
use shared_types::{MessageId, StreamMessage};
use tracing::{debug, info};

use crate::domain::ControlMessage;
use crate::events::SubscriptionError;
use crate::ports::outbound::Transport;

pub struct StreamPublisher {
    factory: Arc<ProtocolMessageFactory>,
    key_store: Arc<dyn GroupKeyStore>,
    key_exchange: Arc<KeyExchangeCoordinator>,
    transport: Arc<dyn Transport>,
}

impl StreamPublisher {
    pub fn new(
        factory: Arc<ProtocolMessageFactory>,
        key_store: Arc<dyn GroupKeyStore>,
        key_exchange: Arc<KeyExchangeCoordinator>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            factory,
            key_store,
            key_exchange,
            transport,
        }
    }

    /// Publish `content` to `stream_id`/`partition`. Returns the id of the
    /// published message.
    pub fn publish(
        &self,
        stream_id: &str,
        partition: u32,
        content: impl Into<Vec<u8>>,
    ) -> Result<MessageId, SubscriptionError> {
        let key = self.key_for(stream_id)?;
        self.send(stream_id, partition, content.into(), &key, None)
    }

    /// Publish with `next` attached under the current key, then switch to
    /// `next`. Subscribers holding the current key learn the next one without
    /// a key exchange.
    pub fn publish_with_next_key(
        &self,
        stream_id: &str,
        partition: u32,
        content: impl Into<Vec<u8>>,
        next: GroupKey,
    ) -> Result<MessageId, SubscriptionError> {
        let key = self.key_for(stream_id)?;
        let id = self.send(stream_id, partition, content.into(), &key, Some(&next))?;
        debug!(stream_id = %stream_id, key_id = %next.id(), "Switching to attached next key");
        self.key_store.set_current(stream_id, next);
        Ok(id)
    }

    /// Replace the current key and announce it to every cached subscriber
    /// that is still permitted.
    pub fn rekey(&self, stream_id: &str) -> Result<GroupKey, SubscriptionError> {
        stream_telemetry::REKEYS.inc();
        Ok(self.key_exchange.rekey(stream_id, false)?)
    }

    /// Replace the current key, announcing it on the stream under the old one.
    pub fn rotate(&self, stream_id: &str) -> Result<GroupKey, SubscriptionError> {
        Ok(self.key_exchange.rotate(stream_id)?)
    }

    fn key_for(&self, stream_id: &str) -> Result<GroupKey, SubscriptionError> {
        if self.key_exchange.key_revocation_needed(stream_id) {
            info!(stream_id = %stream_id, "Revoked subscribers over threshold, rekeying");
            stream_telemetry::REKEYS.inc();
            return Ok(self.key_exchange.rekey(stream_id, true)?);
        }
        match self.key_store.current(stream_id) {
            Some(key) => Ok(key),
            None => {
                let key = GroupKey::generate();
                debug!(stream_id = %stream_id, key_id = %key.id(), "Generated first group key");
                self.key_store.set_current(stream_id, key.clone());
                Ok(key)
            }
        }
    }

    fn send(
        &self,
        stream_id: &str,
        partition: u32,
        content: Vec<u8>,
        key: &GroupKey,
        next: Option<&GroupKey>,
    ) -> Result<MessageId, SubscriptionError> {
        let (id, prev) = self.factory.next_message_id(stream_id, partition);
        let plain = StreamMessage::builder(id.clone())
            .prev_msg_ref(prev)
            .content(content)
            .build();
        let msg = self.factory.sign(encrypt_stream_message(&plain, key, next)?)?;

        self.transport.send(ControlMessage::Publish(msg))?;
        Ok(id)
    }
}

impl std::fmt::Debug for StreamPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPublisher")
            .field("factory", &self.factory)
            .finish_non_exhaustive()
    }
}
