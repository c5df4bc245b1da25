//! # Pending Key Registry
//!
//! The decryption gate between the ordering pipeline and the application.
//!
//! ## Flow
//!
//! ```text
//! in-order msg ──→ plaintext / protocol? ──yes──→ deliver
//!                        │ no
//!                        ↓
//!        key id already waiting? ──yes──→ queue behind (keeps order)
//!                        │ no
//!                        ↓
//!                  decrypt ok? ──yes──→ deliver (+ forward attached next key)
//!                        │ no
//!                        ↓
//!        key id marked failed? ──yes──→ on_unable_to_decrypt
//!                        │ no
//!                        ↓
//!        mark, queue, request key now and every interval (bounded)
//! ```
//!
//! Deliveries happen under the registry lock so released messages cannot be
//! overtaken by newer ones. Key requests and next-key forwarding run after
//! the lock is released.

use std::sync::Arc;

use parking_lot::Mutex;
use shared_crypto::{GroupKey, GroupKeyStore};
use shared_scheduler::{Scheduler, Tick, TimerHandle};
use shared_types::{Address, EncryptedGroupKey, EncryptionType, MessageType, StreamMessage};
use tracing::{debug, warn};

use crate::domain::{decrypt_stream_message, DecryptionConfig, PendingKey, PendingKeyState};
use crate::events::DecryptionError;
use crate::ports::inbound::DecryptionGate;
use crate::ports::outbound::{DecryptedMessageHandler, KeyRequester, NextGroupKeyHandler};

/// Work deferred until the registry lock is released.
enum Effect {
    RequestKey {
        publisher_id: Address,
        key_id: String,
    },
    NextKey {
        publisher_id: Address,
        encrypted: EncryptedGroupKey,
        current: GroupKey,
    },
}

struct RegistryContext {
    stream_id: String,
    config: DecryptionConfig,
    key_store: Arc<dyn GroupKeyStore>,
    key_requester: Arc<dyn KeyRequester>,
    handler: Arc<dyn DecryptedMessageHandler>,
    next_key_handler: Arc<dyn NextGroupKeyHandler>,
    scheduler: Scheduler,
}

impl RegistryContext {
    fn run(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::RequestKey {
                    publisher_id,
                    key_id,
                } => self
                    .key_requester
                    .request_keys(&self.stream_id, publisher_id, vec![key_id]),
                Effect::NextKey {
                    publisher_id,
                    encrypted,
                    current,
                } => self.next_key_handler.on_next_group_key(
                    &self.stream_id,
                    publisher_id,
                    &encrypted,
                    &current,
                ),
            }
        }
    }
}

/// Decryption gate of one stream subscription.
pub struct PendingKeyRegistry {
    ctx: Arc<RegistryContext>,
    state: Arc<Mutex<PendingKeyState>>,
}

impl PendingKeyRegistry {
    pub fn new(
        stream_id: impl Into<String>,
        config: DecryptionConfig,
        key_store: Arc<dyn GroupKeyStore>,
        key_requester: Arc<dyn KeyRequester>,
        handler: Arc<dyn DecryptedMessageHandler>,
        next_key_handler: Arc<dyn NextGroupKeyHandler>,
        scheduler: Scheduler,
    ) -> Self {
        Self {
            ctx: Arc::new(RegistryContext {
                stream_id: stream_id.into(),
                config,
                key_store,
                key_requester,
                handler,
                next_key_handler,
                scheduler,
            }),
            state: Arc::new(Mutex::new(PendingKeyState::default())),
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.ctx.stream_id
    }

    /// Whether messages wait for `key_id`.
    pub fn is_waiting_for(&self, key_id: &str) -> bool {
        self.state.lock().is_waiting_for(key_id)
    }

    fn process(&self, state: &mut PendingKeyState, msg: StreamMessage, effects: &mut Vec<Effect>) {
        if msg.message_type() != MessageType::Message
            || msg.encryption_type() == EncryptionType::None
        {
            self.ctx.handler.on_message(msg);
            return;
        }

        if msg.encryption_type() != EncryptionType::Aes {
            let error = DecryptionError::UnsupportedEncryption(msg.encryption_type());
            self.ctx.handler.on_unable_to_decrypt(msg, error);
            return;
        }

        let Some(key_id) = msg.group_key_id().map(str::to_string) else {
            let error = DecryptionError::UnableToDecrypt {
                key_id: String::new(),
                reason: "encrypted message without group key id".to_string(),
            };
            self.ctx.handler.on_unable_to_decrypt(msg, error);
            return;
        };

        if let Some(pending) = state.pending.get_mut(&key_id) {
            pending.queue.push_back(msg);
            return;
        }

        match self.try_decrypt(&msg, &key_id) {
            Ok((decrypted, key)) => {
                if let Some(next) = msg.new_group_key() {
                    effects.push(Effect::NextKey {
                        publisher_id: msg.publisher_id(),
                        encrypted: next.clone(),
                        current: key,
                    });
                }
                self.ctx.handler.on_message(decrypted);
            }
            Err(error) if state.failed.contains(&key_id) => {
                warn!(
                    stream_id = %self.ctx.stream_id,
                    key_id = %key_id,
                    msg_ref = %msg.message_ref(),
                    error = %error,
                    "Decryption failed again after key delivery"
                );
                self.ctx.handler.on_unable_to_decrypt(msg, error);
            }
            Err(error) => {
                debug!(
                    stream_id = %self.ctx.stream_id,
                    key_id = %key_id,
                    msg_ref = %msg.message_ref(),
                    error = %error,
                    "Group key unavailable, queueing message"
                );
                let publisher_id = msg.publisher_id();
                state.failed.insert(key_id.clone());

                let mut pending = PendingKey::new(publisher_id);
                pending.queue.push_back(msg);
                pending.attempts = 1;
                if !state.stopped {
                    pending.timer.set(self.spawn_key_timer(publisher_id, key_id.clone()));
                }
                state.pending.insert(key_id.clone(), pending);

                effects.push(Effect::RequestKey {
                    publisher_id,
                    key_id,
                });
            }
        }
    }

    fn try_decrypt(
        &self,
        msg: &StreamMessage,
        key_id: &str,
    ) -> Result<(StreamMessage, GroupKey), DecryptionError> {
        let key = self
            .ctx
            .key_store
            .get(&self.ctx.stream_id, key_id)
            .ok_or_else(|| DecryptionError::GroupKeyMissing {
                stream_id: self.ctx.stream_id.clone(),
                key_id: key_id.to_string(),
            })?;
        let decrypted = decrypt_stream_message(msg, &key)?;
        Ok((decrypted, key))
    }

    /// Periodic re-request of `key_id`; the immediate request is sent by the caller.
    fn spawn_key_timer(&self, publisher_id: Address, key_id: String) -> TimerHandle {
        let max = self.ctx.config.max_key_requests;
        let stream_id = self.ctx.stream_id.clone();
        let ctx = Arc::clone(&self.ctx);

        self.ctx.scheduler.spawn_periodic(
            &self.state,
            self.ctx.config.key_request_interval,
            self.ctx.config.key_request_interval,
            move |state: &mut PendingKeyState, id| {
                let Some(pending) = state.pending.get_mut(&key_id) else {
                    return (Tick::Stop, None);
                };
                if pending.attempts >= max {
                    warn!(
                        stream_id = %stream_id,
                        key_id = %key_id,
                        attempts = pending.attempts,
                        waiting = pending.queue.len(),
                        "Giving up requesting group key"
                    );
                    pending.timer.release(id);
                    return (Tick::Stop, None);
                }
                pending.attempts += 1;
                debug!(stream_id = %stream_id, key_id = %key_id, attempt = pending.attempts, "Re-requesting group key");
                (Tick::Continue, Some(key_id.clone()))
            },
            move |request| {
                if let Some(key_id) = request {
                    ctx.key_requester
                        .request_keys(&ctx.stream_id, publisher_id, vec![key_id]);
                }
            },
        )
    }
}

impl DecryptionGate for PendingKeyRegistry {
    fn handle(&self, msg: StreamMessage) {
        let mut effects = Vec::new();
        {
            let mut state = self.state.lock();
            self.process(&mut state, msg, &mut effects);
        }
        self.ctx.run(effects);
    }

    fn on_new_keys_added(&self, publisher_id: Address, key_ids: &[String]) {
        let mut effects = Vec::new();
        {
            let mut state = self.state.lock();
            for key_id in key_ids {
                let matches = state
                    .pending
                    .get(key_id)
                    .is_some_and(|p| p.publisher_id == publisher_id);
                if !matches {
                    continue;
                }
                let Some(mut pending) = state.pending.remove(key_id) else {
                    continue;
                };
                pending.timer.cancel();
                debug!(
                    stream_id = %self.ctx.stream_id,
                    key_id = %key_id,
                    released = pending.queue.len(),
                    "Group key arrived, releasing waiting messages"
                );
                // The failed mark stays set while draining: a second failure is terminal.
                for msg in pending.queue.drain(..) {
                    self.process(&mut state, msg, &mut effects);
                }
                state.failed.remove(key_id);
            }
        }
        self.ctx.run(effects);
    }

    fn on_key_exchange_failed(&self, publisher_id: Address, key_ids: &[String], reason: &str) {
        let state = self.state.lock();
        let waiting: usize = key_ids
            .iter()
            .filter_map(|id| state.pending.get(id))
            .map(|p| p.queue.len())
            .sum();
        warn!(
            stream_id = %self.ctx.stream_id,
            publisher_id = %publisher_id,
            key_ids = ?key_ids,
            waiting,
            reason,
            "Publisher could not serve group key request"
        );
    }

    fn pending_messages(&self) -> usize {
        self.state.lock().pending_messages()
    }

    fn stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        state.cancel_timers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::encrypt_stream_message;
    use shared_crypto::InMemoryGroupKeyStore;
    use shared_types::{MessageId, MessageRef};
    use std::time::Duration;

    // =========================================================================
    // Mock ports
    // =========================================================================

    #[derive(Default)]
    struct MockRequester {
        requests: Mutex<Vec<(String, Address, Vec<String>)>>,
    }

    impl KeyRequester for MockRequester {
        fn request_keys(&self, stream_id: &str, publisher_id: Address, key_ids: Vec<String>) {
            self.requests
                .lock()
                .push((stream_id.to_string(), publisher_id, key_ids));
        }
    }

    #[derive(Default)]
    struct MockHandler {
        delivered: Mutex<Vec<StreamMessage>>,
        failed: Mutex<Vec<DecryptionError>>,
    }

    impl MockHandler {
        fn contents(&self) -> Vec<String> {
            self.delivered
                .lock()
                .iter()
                .map(|m| String::from_utf8_lossy(m.content()).into_owned())
                .collect()
        }
    }

    impl DecryptedMessageHandler for MockHandler {
        fn on_message(&self, msg: StreamMessage) {
            self.delivered.lock().push(msg);
        }

        fn on_unable_to_decrypt(&self, _msg: StreamMessage, error: DecryptionError) {
            self.failed.lock().push(error);
        }
    }

    /// Decrypts and stores attached next keys, like the key-exchange side does.
    struct StoringNextKeyHandler {
        store: Arc<InMemoryGroupKeyStore>,
        seen: Mutex<Vec<String>>,
    }

    impl NextGroupKeyHandler for StoringNextKeyHandler {
        fn on_next_group_key(
            &self,
            stream_id: &str,
            _publisher_id: Address,
            encrypted: &EncryptedGroupKey,
            current: &GroupKey,
        ) {
            let next = current.decrypt_next_key(encrypted).unwrap();
            self.seen.lock().push(next.id().to_string());
            self.store.add(stream_id, next);
        }
    }

    struct Fixture {
        registry: PendingKeyRegistry,
        store: Arc<InMemoryGroupKeyStore>,
        requester: Arc<MockRequester>,
        handler: Arc<MockHandler>,
        next_keys: Arc<StoringNextKeyHandler>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryGroupKeyStore::new());
        let requester = Arc::new(MockRequester::default());
        let handler = Arc::new(MockHandler::default());
        let next_keys = Arc::new(StoringNextKeyHandler {
            store: store.clone(),
            seen: Mutex::new(Vec::new()),
        });
        let registry = PendingKeyRegistry::new(
            "stream",
            DecryptionConfig::default(),
            store.clone(),
            requester.clone(),
            handler.clone(),
            next_keys.clone(),
            Scheduler::from_current().unwrap(),
        );
        Fixture {
            registry,
            store,
            requester,
            handler,
            next_keys,
        }
    }

    fn publisher() -> Address {
        Address::new([0xAA; 20])
    }

    fn plain(ts: i64, content: &str) -> StreamMessage {
        StreamMessage::builder(MessageId::new(
            "stream",
            0,
            MessageRef::new(ts, 0),
            publisher(),
            "chain",
        ))
        .content(content)
        .build()
    }

    fn encrypted(ts: i64, content: &str, key: &GroupKey) -> StreamMessage {
        encrypt_stream_message(&plain(ts, content), key, None).unwrap()
    }

    // =========================================================================
    // Tests
    // =========================================================================

    #[tokio::test]
    async fn test_plaintext_passes_through() {
        let f = fixture();
        f.registry.handle(plain(1, "hello"));
        assert_eq!(f.handler.contents(), vec!["hello"]);
        assert!(f.requester.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_known_key_decrypts() {
        let f = fixture();
        let key = GroupKey::generate();
        f.store.add("stream", key.clone());

        f.registry.handle(encrypted(1, "secret", &key));
        assert_eq!(f.handler.contents(), vec!["secret"]);
        assert_eq!(
            f.handler.delivered.lock()[0].encryption_type(),
            EncryptionType::None
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_key_queues_and_requests() {
        let f = fixture();
        let key = GroupKey::generate();

        f.registry.handle(encrypted(1, "a", &key));
        f.registry.handle(encrypted(2, "b", &key));

        assert!(f.handler.contents().is_empty());
        assert_eq!(f.registry.pending_messages(), 2);
        // Exactly one immediate request for the key id.
        {
            let requests = f.requester.requests.lock();
            assert_eq!(requests.len(), 1);
            assert_eq!(requests[0].0, "stream");
            assert_eq!(requests[0].1, publisher());
            assert_eq!(requests[0].2, vec![key.id().to_string()]);
        }

        tokio::time::sleep(Duration::from_millis(5_100)).await;
        assert_eq!(f.requester.requests.lock().len(), 2);

        f.store.add("stream", key.clone());
        f.registry
            .on_new_keys_added(publisher(), &[key.id().to_string()]);

        assert_eq!(f.handler.contents(), vec!["a", "b"]);
        assert_eq!(f.registry.pending_messages(), 0);
        assert!(!f.registry.is_waiting_for(key.id()));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(f.requester.requests.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_requests_are_bounded() {
        let f = fixture();
        let key = GroupKey::generate();
        f.registry.handle(encrypted(1, "a", &key));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(f.requester.requests.lock().len(), 5);
        // The message keeps waiting for a key delivered by other means.
        assert_eq!(f.registry.pending_messages(), 1);

        f.store.add("stream", key.clone());
        f.registry
            .on_new_keys_added(publisher(), &[key.id().to_string()]);
        assert_eq!(f.handler.contents(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_second_failure_is_terminal() {
        let f = fixture();
        let key = GroupKey::generate();
        f.registry.handle(encrypted(1, "a", &key));

        // Keys "arrive" but the store still lacks the one needed.
        f.registry
            .on_new_keys_added(publisher(), &[key.id().to_string()]);

        assert!(f.handler.contents().is_empty());
        let failed = f.handler.failed.lock();
        assert_eq!(failed.len(), 1);
        assert!(matches!(failed[0], DecryptionError::GroupKeyMissing { .. }));
        assert_eq!(f.registry.pending_messages(), 0);
    }

    #[tokio::test]
    async fn test_keys_of_other_publisher_do_not_release() {
        let f = fixture();
        let key = GroupKey::generate();
        f.registry.handle(encrypted(1, "a", &key));

        f.store.add("stream", key.clone());
        f.registry
            .on_new_keys_added(Address::new([0xBB; 20]), &[key.id().to_string()]);

        assert!(f.handler.contents().is_empty());
        assert_eq!(f.registry.pending_messages(), 1);
    }

    #[tokio::test]
    async fn test_attached_next_key_is_forwarded() {
        let f = fixture();
        let current = GroupKey::generate();
        let next = GroupKey::generate();
        f.store.add("stream", current.clone());

        let rotating = encrypt_stream_message(&plain(1, "a"), &current, Some(&next)).unwrap();
        f.registry.handle(rotating);
        // Encrypted with the announced key right away.
        f.registry.handle(encrypted(2, "b", &next));

        assert_eq!(*f.next_keys.seen.lock(), vec![next.id().to_string()]);
        assert_eq!(f.handler.contents(), vec!["a", "b"]);
        assert!(f.requester.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_rsa_data_message_is_rejected() {
        let f = fixture();
        let msg = plain(1, "x")
            .to_builder()
            .encryption(EncryptionType::Rsa, None)
            .build();
        f.registry.handle(msg);

        assert_eq!(
            *f.handler.failed.lock(),
            vec![DecryptionError::UnsupportedEncryption(EncryptionType::Rsa)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_key_timers() {
        let f = fixture();
        f.registry.handle(encrypted(1, "a", &GroupKey::generate()));
        f.registry.stop();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(f.requester.requests.lock().len(), 1);
    }
}
