//! # Key Exchange Coordinator
//!
//! Runs both sides of the group-key protocol for one client.
//!
//! ## Subscriber side
//!
//! ```text
//! missing key ──→ request_keys ──→ signed GroupKeyRequest ──→ publisher inbox
//!
//! GroupKeyResponse / GroupKeyAnnounce ──→ unwrap (RSA) or decrypt (AES)
//!                                            ──→ key store ──→ NewKeysListener
//! ```
//!
//! ## Publisher side
//!
//! ```text
//! GroupKeyRequest ──→ remember requester's RSA key
//!                 ──→ wrap found keys ──→ GroupKeyResponse (or ErrorResponse)
//!
//! rekey ──→ new key ──→ RSA announce to each still-valid cached subscriber
//!                   ──→ revoke the rest
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use sc_02_decryption::{KeyRequester, NextGroupKeyHandler};
use shared_crypto::{wrap_group_key, CryptoError, GroupKey, GroupKeyStore, RsaKeyPair};
use shared_types::{Address, EncryptedGroupKey, EncryptionType, MessageType, StreamMessage};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::{
    decode_payload, encode_payload, GroupKeyAnnounce, GroupKeyErrorResponse, GroupKeyRequest,
    GroupKeyResponse, KeyExchangeConfig, SubscriberKeyCache, ERROR_INVALID_REQUEST,
    ERROR_KEY_NOT_FOUND,
};
use crate::events::KeyExchangeError;
use crate::factory::ProtocolMessageFactory;
use crate::ports::inbound::KeyExchangeApi;
use crate::ports::outbound::{MessageValidator, NewKeysListener, PermissionOracle, ProtocolPublisher};

pub struct KeyExchangeCoordinator {
    config: KeyExchangeConfig,
    key_store: Arc<dyn GroupKeyStore>,
    rsa: RsaKeyPair,
    factory: Arc<ProtocolMessageFactory>,
    publisher: Arc<dyn ProtocolPublisher>,
    oracle: Arc<dyn PermissionOracle>,
    validator: Arc<dyn MessageValidator>,
    listener: RwLock<Option<Weak<dyn NewKeysListener>>>,
    subscriber_keys: RwLock<SubscriberKeyCache>,
    last_revocation_check: Mutex<HashMap<String, Instant>>,
}

impl KeyExchangeCoordinator {
    /// Create a coordinator with a freshly generated RSA key pair of
    /// `config.rsa_key_bits` bits.
    pub fn new(
        config: KeyExchangeConfig,
        factory: Arc<ProtocolMessageFactory>,
        key_store: Arc<dyn GroupKeyStore>,
        publisher: Arc<dyn ProtocolPublisher>,
        oracle: Arc<dyn PermissionOracle>,
        validator: Arc<dyn MessageValidator>,
    ) -> Result<Self, KeyExchangeError> {
        let rsa = RsaKeyPair::generate(config.rsa_key_bits)?;
        Ok(Self {
            config,
            key_store,
            rsa,
            factory,
            publisher,
            oracle,
            validator,
            listener: RwLock::new(None),
            subscriber_keys: RwLock::new(SubscriberKeyCache::new()),
            last_revocation_check: Mutex::new(HashMap::new()),
        })
    }

    /// Register who is told about new keys. Held weakly.
    pub fn set_listener<L: NewKeysListener + 'static>(&self, listener: &Arc<L>) {
        let listener: Weak<L> = Arc::downgrade(listener);
        let listener: Weak<dyn NewKeysListener> = listener;
        *self.listener.write() = Some(listener);
    }

    pub fn address(&self) -> Address {
        self.factory.address()
    }

    pub fn config(&self) -> &KeyExchangeConfig {
        &self.config
    }

    pub fn public_key_pem(&self) -> &str {
        self.rsa.public_key_pem()
    }

    /// Subscribers of `stream_id` whose RSA key is cached.
    pub fn known_subscribers(&self, stream_id: &str) -> usize {
        self.subscriber_keys.read().len(stream_id)
    }

    /// Publish a signed request for `key_ids` to `publisher_id`'s inbox.
    pub fn request_group_keys(
        &self,
        stream_id: &str,
        publisher_id: Address,
        key_ids: Vec<String>,
    ) -> Result<(), KeyExchangeError> {
        let request = GroupKeyRequest {
            request_id: uuid::Uuid::new_v4().to_string(),
            stream_id: stream_id.to_string(),
            rsa_public_key: self.rsa.public_key_pem().to_string(),
            group_key_ids: key_ids,
        };
        let inbox = self.config.inbox_stream_id(&publisher_id);
        let msg = self.factory.create(
            &inbox,
            MessageType::GroupKeyRequest,
            encode_payload(&request)?,
            EncryptionType::None,
            None,
        )?;

        debug!(
            stream_id = %stream_id,
            publisher_id = %publisher_id,
            request_id = %request.request_id,
            key_ids = ?request.group_key_ids,
            "Requesting group keys"
        );
        self.publisher.publish(msg)
    }

    /// Replace the current key of `stream_id` and announce it on the stream
    /// itself, AES-encrypted under the previous current key.
    ///
    /// Without a previous key the new key only becomes current.
    pub fn rotate(&self, stream_id: &str) -> Result<GroupKey, KeyExchangeError> {
        let next = GroupKey::generate();

        if let Some(current) = self.key_store.current(stream_id) {
            let announce = GroupKeyAnnounce {
                stream_id: stream_id.to_string(),
                encrypted_group_keys: vec![current.encrypt_next_key(&next)?],
            };
            let msg = self.factory.create(
                stream_id,
                MessageType::GroupKeyAnnounce,
                encode_payload(&announce)?,
                EncryptionType::Aes,
                Some(current.id().to_string()),
            )?;
            self.publisher.publish(msg)?;
        }

        self.key_store.set_current(stream_id, next.clone());
        info!(stream_id = %stream_id, key_id = %next.id(), "Group key rotated");
        Ok(next)
    }

    // =========================================================================
    // PROTOCOL HANDLERS
    // =========================================================================

    fn handle_request(&self, msg: &StreamMessage) -> Result<(), KeyExchangeError> {
        let request: GroupKeyRequest = decode_payload(msg)?;
        let requester = msg.publisher_id();

        let mut found = Vec::new();
        let mut missing = Vec::new();
        for key_id in &request.group_key_ids {
            match self.key_store.get(&request.stream_id, key_id) {
                Some(key) => found.push(key),
                None => missing.push(key_id.as_str()),
            }
        }
        if !missing.is_empty() {
            warn!(
                stream_id = %request.stream_id,
                requester = %requester,
                missing = ?missing,
                "Requested group keys not found"
            );
        }

        if found.is_empty() {
            self.remember_subscriber(&request, requester);
            return self.send_error_response(
                requester,
                &request,
                ERROR_KEY_NOT_FOUND,
                format!("none of the {} requested keys is known", request.group_key_ids.len()),
            );
        }

        let wrapped = match found
            .iter()
            .map(|key| wrap_group_key(key, &request.rsa_public_key))
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(wrapped) => wrapped,
            Err(CryptoError::InvalidPublicKey(reason)) => {
                return self.send_error_response(requester, &request, ERROR_INVALID_REQUEST, reason);
            }
            Err(e) => return Err(e.into()),
        };
        self.remember_subscriber(&request, requester);

        let response = GroupKeyResponse {
            request_id: request.request_id.clone(),
            stream_id: request.stream_id.clone(),
            encrypted_group_keys: wrapped,
        };
        let reply = self.factory.create(
            &self.config.inbox_stream_id(&requester),
            MessageType::GroupKeyResponse,
            encode_payload(&response)?,
            EncryptionType::Rsa,
            None,
        )?;

        debug!(
            stream_id = %request.stream_id,
            requester = %requester,
            request_id = %request.request_id,
            keys = response.encrypted_group_keys.len(),
            "Answering group key request"
        );
        self.publisher.publish(reply)
    }

    fn remember_subscriber(&self, request: &GroupKeyRequest, requester: Address) {
        self.subscriber_keys
            .write()
            .remember(&request.stream_id, requester, &request.rsa_public_key);
    }

    fn send_error_response(
        &self,
        requester: Address,
        request: &GroupKeyRequest,
        code: &str,
        message: String,
    ) -> Result<(), KeyExchangeError> {
        let error = GroupKeyErrorResponse {
            request_id: request.request_id.clone(),
            stream_id: request.stream_id.clone(),
            error_code: code.to_string(),
            error_message: message,
            group_key_ids: request.group_key_ids.clone(),
        };
        let reply = self.factory.create(
            &self.config.inbox_stream_id(&requester),
            MessageType::GroupKeyErrorResponse,
            encode_payload(&error)?,
            EncryptionType::None,
            None,
        )?;
        self.publisher.publish(reply)
    }

    /// Decrypt and store keys from a response or announce.
    fn store_keys(
        &self,
        msg: &StreamMessage,
        stream_id: &str,
        encrypted: &[EncryptedGroupKey],
    ) -> Result<(), KeyExchangeError> {
        let keys = match msg.encryption_type() {
            EncryptionType::Rsa => encrypted
                .iter()
                .map(|e| self.rsa.unwrap_group_key(e))
                .collect::<Result<Vec<_>, _>>()?,
            EncryptionType::Aes => {
                let key_id = msg.group_key_id().ok_or_else(|| {
                    KeyExchangeError::Decode("AES-encrypted keys without a group key id".to_string())
                })?;
                let wrapping_key = self.key_store.get(stream_id, key_id).ok_or_else(|| {
                    KeyExchangeError::GroupKeyNotFound {
                        stream_id: stream_id.to_string(),
                        key_id: key_id.to_string(),
                    }
                })?;
                encrypted
                    .iter()
                    .map(|e| wrapping_key.decrypt_next_key(e))
                    .collect::<Result<Vec<_>, _>>()?
            }
            EncryptionType::None => {
                return Err(KeyExchangeError::Decode("group keys sent unencrypted".to_string()));
            }
        };

        let key_ids: Vec<String> = keys.iter().map(|k| k.id().to_string()).collect();
        for key in keys {
            let key_id = key.id().to_string();
            if !self.key_store.add(stream_id, key) {
                debug!(stream_id = %stream_id, key_id = %key_id, "Group key already stored");
            }
        }

        debug!(
            stream_id = %stream_id,
            publisher_id = %msg.publisher_id(),
            key_ids = ?key_ids,
            "Group keys received"
        );
        self.notify_new_keys(stream_id, msg.publisher_id(), &key_ids);
        Ok(())
    }

    fn handle_error_response(&self, msg: &StreamMessage) -> Result<(), KeyExchangeError> {
        let error: GroupKeyErrorResponse = decode_payload(msg)?;
        warn!(
            stream_id = %error.stream_id,
            publisher_id = %msg.publisher_id(),
            code = %error.error_code,
            key_ids = ?error.group_key_ids,
            "Group key request refused: {}",
            error.error_message
        );
        if let Some(listener) = self.listener() {
            listener.on_key_exchange_failed(&error.stream_id, msg.publisher_id(), &error);
        }
        Ok(())
    }

    fn listener(&self) -> Option<Arc<dyn NewKeysListener>> {
        self.listener.read().as_ref().and_then(Weak::upgrade)
    }

    fn notify_new_keys(&self, stream_id: &str, publisher_id: Address, key_ids: &[String]) {
        if let Some(listener) = self.listener() {
            listener.on_new_keys_added(stream_id, publisher_id, key_ids);
        }
    }

    fn announce_to(&self, stream_id: &str, subscriber: Address, pem: &str, key: &GroupKey) -> Result<(), KeyExchangeError> {
        let announce = GroupKeyAnnounce {
            stream_id: stream_id.to_string(),
            encrypted_group_keys: vec![wrap_group_key(key, pem)?],
        };
        let msg = self.factory.create(
            &self.config.inbox_stream_id(&subscriber),
            MessageType::GroupKeyAnnounce,
            encode_payload(&announce)?,
            EncryptionType::Rsa,
            None,
        )?;
        self.publisher.publish(msg)
    }
}

impl KeyExchangeApi for KeyExchangeCoordinator {
    fn handle_protocol_message(&self, msg: &StreamMessage) -> Result<(), KeyExchangeError> {
        self.validator.validate(msg)?;

        match msg.message_type() {
            MessageType::GroupKeyRequest => self.handle_request(msg),
            MessageType::GroupKeyResponse => {
                let response: GroupKeyResponse = decode_payload(msg)?;
                self.store_keys(msg, &response.stream_id, &response.encrypted_group_keys)
            }
            MessageType::GroupKeyAnnounce => {
                let announce: GroupKeyAnnounce = decode_payload(msg)?;
                self.store_keys(msg, &announce.stream_id, &announce.encrypted_group_keys)
            }
            MessageType::GroupKeyErrorResponse => self.handle_error_response(msg),
            other @ MessageType::Message => Err(KeyExchangeError::UnexpectedMessageType(other)),
        }
    }

    fn rekey(&self, stream_id: &str, use_cached_subscribers: bool) -> Result<GroupKey, KeyExchangeError> {
        if !use_cached_subscribers {
            self.oracle.refresh_subscribers(stream_id);
        }

        let key = GroupKey::generate();
        self.key_store.set_current(stream_id, key.clone());

        let cached = self.subscriber_keys.read().subscribers(stream_id);
        let mut revoked = Vec::new();
        let mut announced = 0usize;
        for (subscriber, pem) in cached {
            if !self.oracle.is_valid_subscriber(stream_id, &subscriber) {
                revoked.push(subscriber);
                continue;
            }
            match self.announce_to(stream_id, subscriber, &pem, &key) {
                Ok(()) => announced += 1,
                Err(e) => warn!(
                    stream_id = %stream_id,
                    subscriber = %subscriber,
                    "Failed to announce new group key: {}",
                    e
                ),
            }
        }
        self.subscriber_keys.write().revoke(stream_id, &revoked);

        info!(
            stream_id = %stream_id,
            key_id = %key.id(),
            announced,
            revoked = revoked.len(),
            "Rekeyed stream"
        );
        Ok(key)
    }

    fn key_revocation_needed(&self, stream_id: &str) -> bool {
        let now = Instant::now();
        {
            let mut checks = self.last_revocation_check.lock();
            if let Some(last) = checks.get(stream_id) {
                if now.duration_since(*last) < self.config.revocation_cooldown {
                    return false;
                }
            }
            checks.insert(stream_id.to_string(), now);
        }

        let cached = self.subscriber_keys.read().subscribers(stream_id);
        let to_revoke = cached
            .iter()
            .filter(|(subscriber, _)| !self.oracle.is_valid_subscriber(stream_id, subscriber))
            .count();
        to_revoke >= self.config.revocation_threshold
    }
}

impl KeyRequester for KeyExchangeCoordinator {
    fn request_keys(&self, stream_id: &str, publisher_id: Address, key_ids: Vec<String>) {
        if let Err(e) = self.request_group_keys(stream_id, publisher_id, key_ids) {
            warn!(
                stream_id = %stream_id,
                publisher_id = %publisher_id,
                "Failed to send group key request: {}",
                e
            );
        }
    }
}

impl NextGroupKeyHandler for KeyExchangeCoordinator {
    fn on_next_group_key(
        &self,
        stream_id: &str,
        publisher_id: Address,
        encrypted: &EncryptedGroupKey,
        current: &GroupKey,
    ) {
        match current.decrypt_next_key(encrypted) {
            Ok(next) => {
                let key_id = next.id().to_string();
                if !self.key_store.add(stream_id, next) {
                    debug!(stream_id = %stream_id, key_id = %key_id, "Next group key already stored");
                }
                self.notify_new_keys(stream_id, publisher_id, &[key_id]);
            }
            Err(e) => warn!(
                stream_id = %stream_id,
                publisher_id = %publisher_id,
                key_id = %encrypted.group_key_id,
                "Failed to decrypt attached next group key: {}",
                e
            ),
        }
    }
}
