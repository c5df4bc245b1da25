//! # Protocol Message Factory
//!
//! Stamps outgoing messages with the local publisher identity. Every target
//! stream partition gets its own chain of `(timestamp, sequence)` refs with
//! `prev_msg_ref` links, so the messages pass the recipient's ordering
//! pipeline like any other publisher's.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use shared_crypto::{CryptoError, Secp256k1KeyPair};
use shared_types::{Address, EncryptionType, MessageId, MessageRef, MessageType, StreamMessage};

pub struct ProtocolMessageFactory {
    signer: Secp256k1KeyPair,
    msg_chain_id: String,
    /// Last ref issued per `(stream, partition)`.
    last_refs: Mutex<HashMap<(String, u32), MessageRef>>,
}

impl ProtocolMessageFactory {
    pub fn new(signer: Secp256k1KeyPair) -> Self {
        Self {
            signer,
            msg_chain_id: uuid::Uuid::new_v4().to_string(),
            last_refs: Mutex::new(HashMap::new()),
        }
    }

    /// Address messages are published (and signed) as.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn msg_chain_id(&self) -> &str {
        &self.msg_chain_id
    }

    /// Next id on `(stream_id, partition)` and the ref it follows.
    ///
    /// Within one millisecond (or if the clock steps back) the sequence number
    /// is bumped instead of the timestamp.
    pub fn next_message_id(&self, stream_id: &str, partition: u32) -> (MessageId, Option<MessageRef>) {
        let now = now_millis();
        let mut last_refs = self.last_refs.lock();
        let key = (stream_id.to_string(), partition);
        let prev = last_refs.get(&key).copied();

        let next = match prev {
            Some(last) if now <= last.timestamp => last.next_in_sequence(),
            _ => MessageRef::new(now, 0),
        };
        last_refs.insert(key, next);

        let id = MessageId::new(stream_id, partition, next, self.address(), self.msg_chain_id.clone());
        (id, prev)
    }

    /// Sign `msg` over its signing payload.
    pub fn sign(&self, msg: StreamMessage) -> Result<StreamMessage, CryptoError> {
        let signature = self.signer.sign(&msg.payload_to_sign())?;
        Ok(msg.to_builder().signature(Some(signature)).build())
    }

    /// Build and sign a message on partition 0 of `stream_id`.
    pub fn create(
        &self,
        stream_id: &str,
        message_type: MessageType,
        content: Vec<u8>,
        encryption_type: EncryptionType,
        group_key_id: Option<String>,
    ) -> Result<StreamMessage, CryptoError> {
        let (id, prev) = self.next_message_id(stream_id, 0);
        let msg = StreamMessage::builder(id)
            .prev_msg_ref(prev)
            .message_type(message_type)
            .content(content)
            .encryption(encryption_type, group_key_id)
            .build();
        self.sign(msg)
    }
}

impl std::fmt::Debug for ProtocolMessageFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolMessageFactory")
            .field("address", &self.address())
            .field("msg_chain_id", &self.msg_chain_id)
            .finish_non_exhaustive()
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_crypto::verify_signature;

    #[test]
    fn test_messages_form_a_chain() {
        let factory = ProtocolMessageFactory::new(Secp256k1KeyPair::generate());

        let first = factory
            .create("s", MessageType::Message, b"a".to_vec(), EncryptionType::None, None)
            .unwrap();
        let second = factory
            .create("s", MessageType::Message, b"b".to_vec(), EncryptionType::None, None)
            .unwrap();

        assert_eq!(first.prev_msg_ref(), None);
        assert_eq!(second.prev_msg_ref(), Some(first.message_ref()));
        assert!(second.message_ref() > first.message_ref());
        assert_eq!(first.chain_id(), second.chain_id());
    }

    #[test]
    fn test_streams_have_separate_chains() {
        let factory = ProtocolMessageFactory::new(Secp256k1KeyPair::generate());
        factory.next_message_id("a", 0);

        let (_, prev) = factory.next_message_id("b", 0);
        assert_eq!(prev, None);
        let (_, prev) = factory.next_message_id("a", 1);
        assert_eq!(prev, None);
    }

    #[test]
    fn test_created_messages_are_signed() {
        let signer = Secp256k1KeyPair::generate();
        let address = signer.address();
        let factory = ProtocolMessageFactory::new(signer);

        let msg = factory
            .create("s", MessageType::GroupKeyRequest, b"{}".to_vec(), EncryptionType::None, None)
            .unwrap();

        assert_eq!(msg.publisher_id(), address);
        let signature = msg.signature().unwrap();
        assert!(verify_signature(&address, &msg.payload_to_sign(), signature));
    }
}
