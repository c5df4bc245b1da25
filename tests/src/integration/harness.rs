//! # Test Harness
//!
//! [`Broker`] plays the server: it stores every published message, fans
//! real-time messages out to subscribed clients, acknowledges (un)subscribes
//! and answers resend requests from storage. Each client receives through
//! its own channel, drained by a spawned task, so transport callbacks never
//! re-enter the sender.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use sc_02_decryption::DecryptionError;
use sc_03_key_exchange::PermissionOracle;
use sc_04_subscription::{
    ClientConfig, ControlMessage, DeliveryMode, RequestId, StreamPublisher, SubscriptionApi, SubscriptionError,
    SubscriptionEvents, SubscriptionId, SubscriptionService, Transport, TransportListener,
};
use shared_crypto::{InMemoryGroupKeyStore, Secp256k1KeyPair};
use shared_scheduler::Scheduler;
use shared_types::{Address, StreamMessage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use stream_telemetry::TelemetryConfig;
use tokio::time::Instant;
use tracing::debug;

pub const STREAM: &str = "sensors/temperature";

// =============================================================================
// BROKER
// =============================================================================

enum Inbound {
    Message(StreamMessage),
    Resent(RequestId, StreamMessage),
    ResendDone(RequestId),
    Subscribed(String, u32),
    Unsubscribed(String, u32),
}

struct ClientLink {
    tx: mpsc::UnboundedSender<Inbound>,
    subscriptions: HashSet<(String, u32)>,
}

impl ClientLink {
    fn send(&self, inbound: Inbound) {
        // A closed channel means the client is gone.
        let _ = self.tx.send(inbound);
    }
}

#[derive(Default)]
struct BrokerState {
    storage: HashMap<(String, u32), Vec<StreamMessage>>,
    clients: Vec<ClientLink>,
    /// Real-time deliveries to suppress, by stream and storage index.
    drops: HashSet<(String, usize)>,
}

#[derive(Default)]
pub struct Broker {
    state: Mutex<BrokerState>,
}

impl Broker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Lose the real-time delivery of the `index`-th message published to
    /// `stream_id`. The message is still stored and can be resent.
    pub fn drop_realtime(&self, stream_id: &str, index: usize) {
        self.state.lock().drops.insert((stream_id.to_string(), index));
    }

    /// Messages stored for partition 0 of `stream_id`.
    pub fn stored(&self, stream_id: &str) -> usize {
        self.state
            .lock()
            .storage
            .get(&(stream_id.to_string(), 0))
            .map_or(0, Vec::len)
    }

    fn register(&self, tx: mpsc::UnboundedSender<Inbound>) -> usize {
        let mut state = self.state.lock();
        state.clients.push(ClientLink {
            tx,
            subscriptions: HashSet::new(),
        });
        state.clients.len() - 1
    }

    fn handle(&self, client: usize, control: ControlMessage) {
        let mut state = self.state.lock();
        match control {
            ControlMessage::Subscribe { stream_id, partition } => {
                let link = &mut state.clients[client];
                link.subscriptions.insert((stream_id.clone(), partition));
                link.send(Inbound::Subscribed(stream_id, partition));
            }
            ControlMessage::Unsubscribe { stream_id, partition } => {
                let link = &mut state.clients[client];
                link.subscriptions.remove(&(stream_id.clone(), partition));
                link.send(Inbound::Unsubscribed(stream_id, partition));
            }
            ControlMessage::ResendLast {
                request_id,
                stream_id,
                partition,
                count,
            } => {
                let stored = state.stored(&stream_id, partition);
                let skip = stored.len().saturating_sub(count as usize);
                state.resend(client, request_id, stored.into_iter().skip(skip));
            }
            ControlMessage::ResendFrom {
                request_id,
                stream_id,
                partition,
                from,
                publisher_id,
            } => {
                let stored = state.stored(&stream_id, partition);
                let matching = stored.into_iter().filter(|m| {
                    m.message_ref() >= from && publisher_id.map_or(true, |p| m.publisher_id() == p)
                });
                state.resend(client, request_id, matching);
            }
            ControlMessage::ResendRange {
                request_id,
                stream_id,
                partition,
                from,
                to,
                publisher_id,
                msg_chain_id,
            } => {
                let stored = state.stored(&stream_id, partition);
                let matching = stored.into_iter().filter(|m| {
                    m.message_ref() >= from
                        && m.message_ref() <= to
                        && publisher_id.map_or(true, |p| m.publisher_id() == p)
                        && msg_chain_id.as_deref().map_or(true, |c| m.msg_chain_id() == c)
                });
                state.resend(client, request_id, matching);
            }
            ControlMessage::Publish(msg) => {
                let key = (msg.stream_id().to_string(), msg.partition());
                let messages = state.storage.entry(key.clone()).or_default();
                let index = messages.len();
                messages.push(msg.clone());

                if state.drops.contains(&(key.0.clone(), index)) {
                    return;
                }
                for link in state.clients.iter().filter(|l| l.subscriptions.contains(&key)) {
                    link.send(Inbound::Message(msg.clone()));
                }
            }
        }
    }
}

impl BrokerState {
    fn stored(&self, stream_id: &str, partition: u32) -> Vec<StreamMessage> {
        self.storage
            .get(&(stream_id.to_string(), partition))
            .cloned()
            .unwrap_or_default()
    }

    fn resend(&self, client: usize, request_id: RequestId, messages: impl Iterator<Item = StreamMessage>) {
        let link = &self.clients[client];
        for msg in messages {
            link.send(Inbound::Resent(request_id, msg));
        }
        link.send(Inbound::ResendDone(request_id));
    }
}

struct BrokerTransport {
    broker: Arc<Broker>,
    client: usize,
}

impl Transport for BrokerTransport {
    fn send(&self, control: ControlMessage) -> Result<(), SubscriptionError> {
        self.broker.handle(self.client, control);
        Ok(())
    }
}

// =============================================================================
// PERMISSIONS
// =============================================================================

/// Everyone may publish; everyone may subscribe until revoked.
#[derive(Default)]
pub struct Permissions {
    revoked: RwLock<HashSet<Address>>,
}

impl Permissions {
    pub fn revoke(&self, address: Address) {
        self.revoked.write().insert(address);
    }
}

impl PermissionOracle for Permissions {
    fn is_valid_publisher(&self, _stream_id: &str, _address: &Address) -> bool {
        true
    }

    fn is_valid_subscriber(&self, _stream_id: &str, address: &Address) -> bool {
        !self.revoked.read().contains(address)
    }
}

// =============================================================================
// CLIENTS
// =============================================================================

#[derive(Default)]
pub struct CollectingEvents {
    messages: Mutex<Vec<String>>,
    undecryptable: Mutex<Vec<DecryptionError>>,
    done: Mutex<usize>,
    errors: Mutex<Vec<SubscriptionError>>,
}

impl CollectingEvents {
    pub fn contents(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    pub fn received(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn done_count(&self) -> usize {
        *self.done.lock()
    }

    pub fn undecryptable(&self) -> usize {
        self.undecryptable.lock().len()
    }

    pub fn errors(&self) -> Vec<SubscriptionError> {
        self.errors.lock().clone()
    }
}

impl SubscriptionEvents for CollectingEvents {
    fn on_message(&self, _subscription: SubscriptionId, msg: StreamMessage) {
        self.messages
            .lock()
            .push(String::from_utf8_lossy(msg.content()).into_owned());
    }

    fn on_unable_to_decrypt(&self, _subscription: SubscriptionId, _msg: StreamMessage, error: DecryptionError) {
        self.undecryptable.lock().push(error);
    }

    fn on_done(&self, _subscription: SubscriptionId) {
        *self.done.lock() += 1;
    }

    fn on_error(&self, _subscription: SubscriptionId, error: &SubscriptionError) {
        self.errors.lock().push(error.clone());
    }
}

pub struct TestClient {
    pub service: Arc<SubscriptionService>,
    inbound: JoinHandle<()>,
}

impl TestClient {
    /// Connect a new client to `broker` and subscribe it to its key exchange
    /// stream. Must be called inside a Tokio runtime.
    pub fn connect(broker: &Arc<Broker>, permissions: &Arc<Permissions>, config: ClientConfig) -> Self {
        init_logging();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let client = broker.register(tx);
        let transport = Arc::new(BrokerTransport {
            broker: Arc::clone(broker),
            client,
        });
        let service = Arc::new(
            SubscriptionService::new(
                config,
                Secp256k1KeyPair::generate(),
                transport,
                Arc::clone(permissions) as Arc<dyn PermissionOracle>,
                Arc::new(InMemoryGroupKeyStore::new()),
                Scheduler::from_current().expect("no runtime"),
            )
            .expect("client setup failed"),
        );
        service.start().expect("start failed");
        debug!(client, address = %service.address(), "Test client connected");

        let listener = Arc::clone(&service);
        let inbound = tokio::spawn(async move {
            while let Some(inbound) = rx.recv().await {
                match inbound {
                    Inbound::Message(msg) => listener.on_message(msg),
                    Inbound::Resent(request_id, msg) => listener.on_resent_message(request_id, msg),
                    Inbound::ResendDone(request_id) => listener.on_resend_done(request_id),
                    Inbound::Subscribed(stream_id, partition) => listener.on_subscribed(&stream_id, partition),
                    Inbound::Unsubscribed(stream_id, partition) => {
                        listener.on_unsubscribed(&stream_id, partition)
                    }
                }
            }
        });

        Self { service, inbound }
    }

    pub fn address(&self) -> Address {
        self.service.address()
    }

    pub fn inbox(&self) -> String {
        self.service.inbox_stream_id().to_string()
    }

    pub fn publisher(&self) -> StreamPublisher {
        self.service.publisher()
    }

    pub fn subscribe(&self, mode: DeliveryMode) -> (SubscriptionId, Arc<CollectingEvents>) {
        let events = Arc::new(CollectingEvents::default());
        let id = self
            .service
            .subscribe(STREAM, 0, mode, events.clone())
            .expect("subscribe failed");
        (id, events)
    }

    /// Subscribe and wait for the acknowledgement.
    pub async fn subscribed(&self, mode: DeliveryMode) -> (SubscriptionId, Arc<CollectingEvents>) {
        let (id, events) = self.subscribe(mode);
        let service = Arc::clone(&self.service);
        eventually("subscribe acknowledgement", move || {
            service
                .subscription(id)
                .is_some_and(|s| s.state() == sc_04_subscription::SubscriptionState::Subscribed)
        })
        .await;
        (id, events)
    }
}

impl Drop for TestClient {
    fn drop(&mut self) {
        self.inbound.abort();
    }
}

/// Warnings and errors of every subsystem; `RUST_LOG` overrides.
fn init_logging() {
    let config = TelemetryConfig {
        log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string()),
        ..TelemetryConfig::default()
    };
    // Only the first client of the test binary installs the subscriber.
    let _ = stream_telemetry::init_logging(&config);
}

/// Short timers so gap repair and key retries happen within a test.
pub fn fast_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.ordering.propagation_timeout = Duration::from_millis(50);
    config.ordering.resend_timeout = Duration::from_millis(50);
    config.decryption.key_request_interval = Duration::from_secs(1);
    config.key_exchange.rsa_key_bits = 1024;
    config
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Let in-flight deliveries settle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(300)).await;
}
