//! Test doubles for the subscription ports.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sc_02_decryption::DecryptionError;
use sc_03_key_exchange::PermissionOracle;
use shared_crypto::{InMemoryGroupKeyStore, Secp256k1KeyPair};
use shared_scheduler::Scheduler;
use shared_types::{Address, MessageId, MessageRef, StreamMessage};

use crate::domain::{ClientConfig, ControlMessage, SubscriptionId};
use crate::events::SubscriptionError;
use crate::ports::outbound::{SubscriptionEvents, Transport};
use crate::service::SubscriptionService;

pub const STREAM: &str = "weather";

/// Everyone may publish and subscribe everywhere.
pub struct AllowAll;

impl PermissionOracle for AllowAll {
    fn is_valid_publisher(&self, _stream_id: &str, _address: &Address) -> bool {
        true
    }

    fn is_valid_subscriber(&self, _stream_id: &str, _address: &Address) -> bool {
        true
    }
}

#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<ControlMessage>>,
    failing: AtomicBool,
}

impl RecordingTransport {
    pub fn take(&self) -> Vec<ControlMessage> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Published messages among `controls`.
    pub fn published(controls: &[ControlMessage]) -> Vec<StreamMessage> {
        controls
            .iter()
            .filter_map(|c| match c {
                ControlMessage::Publish(msg) => Some(msg.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, control: ControlMessage) -> Result<(), SubscriptionError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SubscriptionError::Transport("connection closed".to_string()));
        }
        self.sent.lock().push(control);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingEvents {
    pub messages: Mutex<Vec<StreamMessage>>,
    pub undecryptable: Mutex<Vec<DecryptionError>>,
    pub done: Mutex<Vec<SubscriptionId>>,
    pub errors: Mutex<Vec<SubscriptionError>>,
}

impl RecordingEvents {
    pub fn contents(&self) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .map(|m| String::from_utf8_lossy(m.content()).into_owned())
            .collect()
    }
}

impl SubscriptionEvents for RecordingEvents {
    fn on_message(&self, _subscription: SubscriptionId, msg: StreamMessage) {
        self.messages.lock().push(msg);
    }

    fn on_unable_to_decrypt(&self, _subscription: SubscriptionId, _msg: StreamMessage, error: DecryptionError) {
        self.undecryptable.lock().push(error);
    }

    fn on_done(&self, subscription: SubscriptionId) {
        self.done.lock().push(subscription);
    }

    fn on_error(&self, _subscription: SubscriptionId, error: &SubscriptionError) {
        self.errors.lock().push(error.clone());
    }
}

pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.ordering.propagation_timeout = Duration::from_millis(100);
    config.ordering.resend_timeout = Duration::from_millis(100);
    config.ordering.max_gap_requests = 2;
    config.key_exchange.rsa_key_bits = 1024;
    config
}

pub struct Client {
    pub service: SubscriptionService,
    pub transport: Arc<RecordingTransport>,
    pub store: Arc<InMemoryGroupKeyStore>,
}

/// A client on the current runtime. Must be called inside a Tokio runtime.
pub fn client(config: ClientConfig) -> Client {
    let transport = Arc::new(RecordingTransport::default());
    let store = Arc::new(InMemoryGroupKeyStore::new());
    let service = SubscriptionService::new(
        config,
        Secp256k1KeyPair::generate(),
        transport.clone(),
        Arc::new(AllowAll),
        store.clone(),
        Scheduler::from_current().unwrap(),
    )
    .unwrap();
    Client {
        service,
        transport,
        store,
    }
}

/// Unencrypted message of chain `c1` on [`STREAM`] partition 0.
pub fn message(publisher: Address, timestamp: i64, prev: Option<i64>, content: &str) -> StreamMessage {
    StreamMessage::builder(MessageId::new(
        STREAM,
        0,
        MessageRef::new(timestamp, 0),
        publisher,
        "c1",
    ))
    .prev_msg_ref(prev.map(|t| MessageRef::new(t, 0)))
    .content(content)
    .build()
}
