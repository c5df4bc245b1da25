//! # Stream Message Validator
//!
//! Default [`MessageValidator`]: checks signatures and publish / subscribe
//! permissions before a message enters the pipeline.
//!
//! | Message | Signature | Sender | Recipient (inbox owner) |
//! |---------|-----------|--------|-------------------------|
//! | data | verified if present | publisher | - |
//! | request | required | subscriber | publisher |
//! | response / error-response | required | publisher | subscriber |
//! | announce on inbox | required | publisher | subscriber |
//! | announce on data stream | required | publisher | - |
//!
//! Permissions of protocol messages are checked against the stream named in
//! the payload, not the inbox stream they travel on.

use std::sync::Arc;

use serde::Deserialize;
use shared_crypto::recover_address;
use shared_types::{Address, MessageType, StreamMessage, ValidationError};

use crate::domain::{decode_payload, KeyExchangeConfig};
use crate::ports::outbound::{MessageValidator, PermissionOracle};

/// The one field every protocol payload shares.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetStream {
    stream_id: String,
}

pub struct StreamMessageValidator {
    oracle: Arc<dyn PermissionOracle>,
    config: KeyExchangeConfig,
}

impl StreamMessageValidator {
    pub fn new(oracle: Arc<dyn PermissionOracle>, config: KeyExchangeConfig) -> Self {
        Self { oracle, config }
    }

    fn validate_data(&self, msg: &StreamMessage) -> Result<(), ValidationError> {
        if msg.signature().is_some() {
            self.verify_signer(msg)?;
        }
        self.require_publisher(msg.stream_id(), &msg.publisher_id())
    }

    fn validate_protocol(&self, msg: &StreamMessage) -> Result<(), ValidationError> {
        self.verify_signer(msg)?;

        let on_inbox = self.config.is_inbox(msg.stream_id());
        if msg.message_type() == MessageType::GroupKeyAnnounce && !on_inbox {
            return self.require_publisher(msg.stream_id(), &msg.publisher_id());
        }

        let recipient = self.config.inbox_owner(msg.stream_id()).ok_or_else(|| {
            ValidationError::InvalidMessage(format!(
                "{:?} must be sent to a key exchange stream, got {}",
                msg.message_type(),
                msg.stream_id()
            ))
        })?;
        let target = decode_payload::<TargetStream>(msg)
            .map_err(|e| ValidationError::InvalidMessage(e.to_string()))?
            .stream_id;

        if msg.message_type() == MessageType::GroupKeyRequest {
            self.require_subscriber(&target, &msg.publisher_id())?;
            self.require_publisher(&target, &recipient)
        } else {
            self.require_publisher(&target, &msg.publisher_id())?;
            self.require_subscriber(&target, &recipient)
        }
    }

    /// Unsigned or mis-signed messages are rejected.
    fn verify_signer(&self, msg: &StreamMessage) -> Result<(), ValidationError> {
        let signature = msg.signature().ok_or_else(|| {
            ValidationError::UnsignedNotAllowed(format!(
                "{:?} from {} on {}",
                msg.message_type(),
                msg.publisher_id(),
                msg.stream_id()
            ))
        })?;

        match recover_address(&msg.payload_to_sign(), signature) {
            Ok(signer) if signer == msg.publisher_id() => Ok(()),
            Ok(signer) => Err(ValidationError::InvalidSignature(format!(
                "signed by {} but claims publisher {}",
                signer,
                msg.publisher_id()
            ))),
            Err(e) => Err(ValidationError::InvalidSignature(e.to_string())),
        }
    }

    fn require_publisher(&self, stream_id: &str, address: &Address) -> Result<(), ValidationError> {
        if self.oracle.is_valid_publisher(stream_id, address) {
            Ok(())
        } else {
            Err(ValidationError::PermissionViolation(format!(
                "{} is not a publisher of {}",
                address, stream_id
            )))
        }
    }

    fn require_subscriber(&self, stream_id: &str, address: &Address) -> Result<(), ValidationError> {
        if self.oracle.is_valid_subscriber(stream_id, address) {
            Ok(())
        } else {
            Err(ValidationError::PermissionViolation(format!(
                "{} is not a subscriber of {}",
                address, stream_id
            )))
        }
    }
}

impl MessageValidator for StreamMessageValidator {
    fn validate(&self, msg: &StreamMessage) -> Result<(), ValidationError> {
        if msg.message_type().is_key_exchange() {
            self.validate_protocol(msg)
        } else {
            self.validate_data(msg)
        }
    }
}
