//! # Stream Messages
//!
//! The immutable message value passed through the receive pipeline, plus its
//! encryption metadata.
//!
//! A [`StreamMessage`] is owned by whichever component currently processes
//! it. Decryption and re-encryption never mutate it in place: they build a new
//! copy via [`StreamMessage::to_builder`].

use serde::{Deserialize, Serialize};

use crate::entities::{Address, ChainId, MessageId, MessageRef};

/// Kind of payload carried by a stream message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Application data.
    Message,
    /// Subscriber asks a publisher for missing group keys.
    GroupKeyRequest,
    /// Publisher answers a request with RSA-wrapped keys.
    GroupKeyResponse,
    /// Publisher pushes keys unsolicited (rekey).
    GroupKeyAnnounce,
    /// Publisher reports that a request could not be served.
    GroupKeyErrorResponse,
}

impl MessageType {
    /// Whether this type belongs to the key-exchange protocol.
    pub fn is_key_exchange(&self) -> bool {
        !matches!(self, MessageType::Message)
    }

    fn code(&self) -> u8 {
        match self {
            MessageType::Message => 27,
            MessageType::GroupKeyRequest => 28,
            MessageType::GroupKeyResponse => 29,
            MessageType::GroupKeyAnnounce => 30,
            MessageType::GroupKeyErrorResponse => 31,
        }
    }
}

/// How the content of a message is encrypted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EncryptionType {
    /// Plaintext content.
    #[default]
    None,
    /// AES-256-CTR under a group key identified by `group_key_id`.
    Aes,
    /// Individually RSA-wrapped (key-exchange payloads only).
    Rsa,
}

impl EncryptionType {
    fn code(&self) -> u8 {
        match self {
            EncryptionType::None => 0,
            EncryptionType::Aes => 2,
            EncryptionType::Rsa => 1,
        }
    }
}

/// A group key encrypted under another key.
///
/// Produced by encrypting a group key under a previous group key (AES) or an
/// RSA public key. The ciphertext is hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EncryptedGroupKey {
    /// Id of the key that was encrypted (not of the encrypting key).
    pub group_key_id: String,
    /// Hex-encoded ciphertext of the raw key bytes.
    pub encrypted_group_key_hex: String,
}

impl EncryptedGroupKey {
    pub fn new(group_key_id: impl Into<String>, encrypted_group_key_hex: impl Into<String>) -> Self {
        Self {
            group_key_id: group_key_id.into(),
            encrypted_group_key_hex: encrypted_group_key_hex.into(),
        }
    }
}

/// An application or protocol message on a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMessage {
    message_id: MessageId,
    prev_msg_ref: Option<MessageRef>,
    message_type: MessageType,
    content: Vec<u8>,
    encryption_type: EncryptionType,
    group_key_id: Option<String>,
    new_group_key: Option<EncryptedGroupKey>,
    signature: Option<Vec<u8>>,
}

impl StreamMessage {
    /// Starts building a plaintext data message with the given id.
    pub fn builder(message_id: MessageId) -> StreamMessageBuilder {
        StreamMessageBuilder {
            message_id,
            prev_msg_ref: None,
            message_type: MessageType::Message,
            content: Vec::new(),
            encryption_type: EncryptionType::None,
            group_key_id: None,
            new_group_key: None,
            signature: None,
        }
    }

    /// Builder initialised with a copy of every field of this message.
    pub fn to_builder(&self) -> StreamMessageBuilder {
        StreamMessageBuilder {
            message_id: self.message_id.clone(),
            prev_msg_ref: self.prev_msg_ref,
            message_type: self.message_type,
            content: self.content.clone(),
            encryption_type: self.encryption_type,
            group_key_id: self.group_key_id.clone(),
            new_group_key: self.new_group_key.clone(),
            signature: self.signature.clone(),
        }
    }

    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    pub fn message_ref(&self) -> MessageRef {
        self.message_id.message_ref
    }

    /// Explicit predecessor pointer; `None` for unchained messages.
    pub fn prev_msg_ref(&self) -> Option<MessageRef> {
        self.prev_msg_ref
    }

    pub fn stream_id(&self) -> &str {
        &self.message_id.stream_id
    }

    pub fn partition(&self) -> u32 {
        self.message_id.partition
    }

    pub fn publisher_id(&self) -> Address {
        self.message_id.publisher_id
    }

    pub fn msg_chain_id(&self) -> &str {
        &self.message_id.msg_chain_id
    }

    pub fn chain_id(&self) -> ChainId {
        self.message_id.chain_id()
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn encryption_type(&self) -> EncryptionType {
        self.encryption_type
    }

    pub fn group_key_id(&self) -> Option<&str> {
        self.group_key_id.as_deref()
    }

    pub fn new_group_key(&self) -> Option<&EncryptedGroupKey> {
        self.new_group_key.as_ref()
    }

    pub fn signature(&self) -> Option<&[u8]> {
        self.signature.as_deref()
    }

    /// Deterministic byte string covered by the publisher's signature.
    ///
    /// Every variable-length field is prefixed with its big-endian `u32`
    /// length so that distinct messages can never produce the same payload.
    pub fn payload_to_sign(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(128 + self.content.len());
        let id = &self.message_id;

        push_field(&mut payload, id.stream_id.as_bytes());
        payload.extend_from_slice(&id.partition.to_be_bytes());
        payload.extend_from_slice(&id.message_ref.timestamp.to_be_bytes());
        payload.extend_from_slice(&id.message_ref.sequence_number.to_be_bytes());
        payload.extend_from_slice(id.publisher_id.as_bytes());
        push_field(&mut payload, id.msg_chain_id.as_bytes());

        match self.prev_msg_ref {
            Some(prev) => {
                payload.push(1);
                payload.extend_from_slice(&prev.timestamp.to_be_bytes());
                payload.extend_from_slice(&prev.sequence_number.to_be_bytes());
            }
            None => payload.push(0),
        }

        payload.push(self.message_type.code());
        payload.push(self.encryption_type.code());
        push_field(
            &mut payload,
            self.group_key_id.as_deref().unwrap_or_default().as_bytes(),
        );
        push_field(&mut payload, &self.content);

        match &self.new_group_key {
            Some(key) => {
                payload.push(1);
                push_field(&mut payload, key.group_key_id.as_bytes());
                push_field(&mut payload, key.encrypted_group_key_hex.as_bytes());
            }
            None => payload.push(0),
        }

        payload
    }
}

fn push_field(payload: &mut Vec<u8>, field: &[u8]) {
    payload.extend_from_slice(&(field.len() as u32).to_be_bytes());
    payload.extend_from_slice(field);
}

/// Builder for [`StreamMessage`].
#[derive(Debug, Clone)]
pub struct StreamMessageBuilder {
    message_id: MessageId,
    prev_msg_ref: Option<MessageRef>,
    message_type: MessageType,
    content: Vec<u8>,
    encryption_type: EncryptionType,
    group_key_id: Option<String>,
    new_group_key: Option<EncryptedGroupKey>,
    signature: Option<Vec<u8>>,
}

impl StreamMessageBuilder {
    pub fn prev_msg_ref(mut self, prev_msg_ref: Option<MessageRef>) -> Self {
        self.prev_msg_ref = prev_msg_ref;
        self
    }

    pub fn message_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    pub fn content(mut self, content: impl Into<Vec<u8>>) -> Self {
        self.content = content.into();
        self
    }

    pub fn encryption(mut self, encryption_type: EncryptionType, group_key_id: Option<String>) -> Self {
        self.encryption_type = encryption_type;
        self.group_key_id = group_key_id;
        self
    }

    pub fn new_group_key(mut self, new_group_key: Option<EncryptedGroupKey>) -> Self {
        self.new_group_key = new_group_key;
        self
    }

    pub fn signature(mut self, signature: Option<Vec<u8>>) -> Self {
        self.signature = signature;
        self
    }

    pub fn build(self) -> StreamMessage {
        StreamMessage {
            message_id: self.message_id,
            prev_msg_ref: self.prev_msg_ref,
            message_type: self.message_type,
            content: self.content,
            encryption_type: self.encryption_type,
            group_key_id: self.group_key_id,
            new_group_key: self.new_group_key,
            signature: self.signature,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(ts: i64, prev: Option<MessageRef>) -> StreamMessage {
        let id = MessageId::new("stream", 0, MessageRef::new(ts, 0), Address::new([1; 20]), "c");
        StreamMessage::builder(id)
            .prev_msg_ref(prev)
            .content(b"hello".to_vec())
            .build()
    }

    #[test]
    fn test_builder_defaults_to_plaintext_data() {
        let msg = message(1, None);
        assert_eq!(msg.message_type(), MessageType::Message);
        assert_eq!(msg.encryption_type(), EncryptionType::None);
        assert!(msg.group_key_id().is_none());
        assert!(msg.signature().is_none());
    }

    #[test]
    fn test_to_builder_copies_and_overrides() {
        let original = message(1, Some(MessageRef::new(0, 0)));
        let copy = original.to_builder().content(b"other".to_vec()).build();

        assert_eq!(copy.message_id(), original.message_id());
        assert_eq!(copy.prev_msg_ref(), original.prev_msg_ref());
        assert_eq!(copy.content(), b"other");
        assert_eq!(original.content(), b"hello");
    }

    #[test]
    fn test_payload_to_sign_ignores_signature() {
        let msg = message(1, None);
        let signed = msg.to_builder().signature(Some(vec![7; 65])).build();
        assert_eq!(msg.payload_to_sign(), signed.payload_to_sign());
    }

    #[test]
    fn test_payload_to_sign_covers_prev_ref() {
        let a = message(1, None);
        let b = message(1, Some(MessageRef::new(0, 0)));
        assert_ne!(a.payload_to_sign(), b.payload_to_sign());
    }

    #[test]
    fn test_key_exchange_types() {
        assert!(!MessageType::Message.is_key_exchange());
        assert!(MessageType::GroupKeyRequest.is_key_exchange());
        assert!(MessageType::GroupKeyErrorResponse.is_key_exchange());
    }
}
