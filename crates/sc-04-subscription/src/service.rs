//! # Subscription Service
//!
//! Composition root of the receive side. Owns the subscriptions of one client
//! and wires every pipeline to the shared key store, the key exchange and the
//! transport.
//!
//! ## Message Routing
//!
//! ```text
//! on_message ──→ local key exchange stream? ──yes──→ [inbox ordering] ──→ [KeyExchangeCoordinator]
//!                        │ no
//!                        ↓
//!                 validate ──→ every subscription of (stream, partition)
//!
//! on_resent_message(request) ──→ the pipeline that sent the request
//! gap in a chain ──→ ResendRange(request) ──→ transport
//! ```
//!
//! The coordinator reports new keys back here; they are fanned out to the
//! decryption gates of every subscription of the stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use sc_01_message_ordering::{
    ChainMultiplexer, GapFillFailurePolicy, GapHandler, GapRange, MessageDeliverer, MessageOrderingApi,
    OrderingError,
};
use sc_02_decryption::PendingKeyRegistry;
use sc_03_key_exchange::{
    GroupKeyErrorResponse, KeyExchangeApi, KeyExchangeCoordinator, KeyExchangeError, MessageValidator,
    NewKeysListener, PermissionOracle, ProtocolMessageFactory, ProtocolPublisher, StreamMessageValidator,
};
use shared_crypto::{GroupKeyStore, Secp256k1KeyPair};
use shared_scheduler::Scheduler;
use shared_types::{Address, StreamMessage};
use tracing::{debug, error, info, warn};

use crate::domain::{ClientConfig, ControlMessage, DeliveryMode, LifecycleEvent, RequestId, SubscriptionId, SubscriptionState};
use crate::events::SubscriptionError;
use crate::pipeline::{DecryptionStage, EventsAdapter, MeteredKeyRequester, Pipeline, PipelineKind};
use crate::ports::inbound::{SubscriptionApi, TransportListener};
use crate::ports::outbound::{SubscriptionEvents, Transport};
use crate::publisher::StreamPublisher;
use crate::subscription::Subscription;

/// Where a resend request's answer goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GapTarget {
    Inbox,
    Subscription(SubscriptionId, PipelineKind),
}

#[derive(Debug, Clone, Copy)]
struct PendingResend {
    target: GapTarget,
    /// The initial resend of a historical or combined subscription.
    initial: bool,
}

pub struct SubscriptionService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    key_store: Arc<dyn GroupKeyStore>,
    factory: Arc<ProtocolMessageFactory>,
    key_exchange: Arc<KeyExchangeCoordinator>,
    validator: Arc<dyn MessageValidator>,
    scheduler: Scheduler,
    inbox_stream_id: String,
    inbox: ChainMultiplexer,
    subscriptions: RwLock<HashMap<SubscriptionId, Arc<Subscription>>>,
    resends: Mutex<HashMap<RequestId, PendingResend>>,
    next_subscription: AtomicU64,
    next_request: AtomicU64,
}

impl SubscriptionService {
    /// Wire a client publishing and signing as `signer`.
    ///
    /// Generates the client's RSA key pair, which takes a moment for large
    /// `config.key_exchange.rsa_key_bits`.
    pub fn new(
        config: ClientConfig,
        signer: Secp256k1KeyPair,
        transport: Arc<dyn Transport>,
        oracle: Arc<dyn PermissionOracle>,
        key_store: Arc<dyn GroupKeyStore>,
        scheduler: Scheduler,
    ) -> Result<Self, SubscriptionError> {
        let factory = Arc::new(ProtocolMessageFactory::new(signer));
        let validator: Arc<dyn MessageValidator> = Arc::new(StreamMessageValidator::new(
            Arc::clone(&oracle),
            config.key_exchange.clone(),
        ));
        let key_exchange = Arc::new(KeyExchangeCoordinator::new(
            config.key_exchange.clone(),
            Arc::clone(&factory),
            Arc::clone(&key_store),
            Arc::new(TransportPublisher {
                transport: Arc::clone(&transport),
            }),
            oracle,
            Arc::clone(&validator),
        )?);
        let inbox_stream_id = config.key_exchange.inbox_stream_id(&factory.address());

        let inner = Arc::new_cyclic(|weak: &Weak<ServiceInner>| ServiceInner {
            inbox: ChainMultiplexer::new(
                inbox_stream_id.clone(),
                0,
                config.ordering.clone(),
                Arc::new(InboxDeliverer {
                    key_exchange: Arc::clone(&key_exchange),
                }),
                Arc::new(ResendGapHandler {
                    service: weak.clone(),
                    target: GapTarget::Inbox,
                }),
                scheduler.clone(),
            ),
            config,
            transport,
            key_store,
            factory,
            key_exchange,
            validator,
            scheduler,
            inbox_stream_id,
            subscriptions: RwLock::new(HashMap::new()),
            resends: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
            next_request: AtomicU64::new(1),
        });
        inner.key_exchange.set_listener(&inner);

        Ok(Self { inner })
    }

    /// Subscribe to the local key exchange stream.
    pub fn start(&self) -> Result<(), SubscriptionError> {
        info!(
            address = %self.inner.factory.address(),
            inbox = %self.inner.inbox_stream_id,
            "Starting subscription service"
        );
        self.inner.transport.send(ControlMessage::Subscribe {
            stream_id: self.inner.inbox_stream_id.clone(),
            partition: 0,
        })
    }

    pub fn address(&self) -> Address {
        self.inner.factory.address()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn inbox_stream_id(&self) -> &str {
        &self.inner.inbox_stream_id
    }

    pub fn key_exchange(&self) -> &Arc<KeyExchangeCoordinator> {
        &self.inner.key_exchange
    }

    /// Publish path sharing this client's identity and keys.
    pub fn publisher(&self) -> StreamPublisher {
        StreamPublisher::new(
            Arc::clone(&self.inner.factory),
            Arc::clone(&self.inner.key_store),
            Arc::clone(&self.inner.key_exchange),
            Arc::clone(&self.inner.transport),
        )
    }

    pub fn subscription(&self, id: SubscriptionId) -> Option<Arc<Subscription>> {
        self.inner.subscriptions.read().get(&id).cloned()
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.read().len()
    }
}

impl SubscriptionApi for SubscriptionService {
    fn subscribe(
        &self,
        stream_id: &str,
        partition: u32,
        mode: DeliveryMode,
        events: Arc<dyn SubscriptionEvents>,
    ) -> Result<SubscriptionId, SubscriptionError> {
        self.inner.subscribe(stream_id, partition, mode, events)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), SubscriptionError> {
        self.inner.unsubscribe(id)
    }

    fn resubscribe(&self, id: SubscriptionId) -> Result<(), SubscriptionError> {
        self.inner.resubscribe(id)
    }
}

impl TransportListener for SubscriptionService {
    fn on_message(&self, msg: StreamMessage) {
        let inner = &self.inner;
        if msg.stream_id() == inner.inbox_stream_id {
            inner.route_inbox(msg);
        } else if inner.accept(&msg) {
            for subscription in inner.subscriptions_of(msg.stream_id(), Some(msg.partition())) {
                if let Err(e) = subscription.handle_realtime(msg.clone()) {
                    inner.fail(&subscription, e);
                }
            }
        }
        inner.check_done_all();
    }

    fn on_resent_message(&self, request_id: RequestId, msg: StreamMessage) {
        let inner = &self.inner;
        let resend = inner.resends.lock().get(&request_id).copied();
        match resend.map(|r| r.target) {
            None => debug!(request_id = %request_id, "Resent message for unknown request"),
            Some(GapTarget::Inbox) => inner.route_inbox(msg),
            Some(GapTarget::Subscription(id, kind)) => {
                if let Some(subscription) = inner.get(id) {
                    if inner.accept(&msg) {
                        if let Err(e) = subscription.handle_resent(kind, msg) {
                            inner.fail(&subscription, e);
                        }
                    }
                }
            }
        }
        inner.check_done_all();
    }

    fn on_resend_done(&self, request_id: RequestId) {
        let inner = &self.inner;
        let Some(resend) = inner.resends.lock().remove(&request_id) else {
            return;
        };
        if let (true, GapTarget::Subscription(id, _)) = (resend.initial, resend.target) {
            if let Some(subscription) = inner.get(id) {
                if let Err(e) = subscription.end_resend() {
                    inner.fail(&subscription, e);
                }
            }
        }
        inner.check_done_all();
    }

    fn on_subscribed(&self, stream_id: &str, partition: u32) {
        let inner = &self.inner;
        for subscription in inner.subscriptions_of(stream_id, Some(partition)) {
            if subscription.state() != SubscriptionState::Subscribing {
                continue;
            }
            if let Err(e) = subscription.transition(LifecycleEvent::SubscribeAcked) {
                debug!("Ignoring subscribe acknowledgement: {}", e);
                continue;
            }
            info!(subscription = %subscription.id(), stream_id, partition, "Subscribed");
            if subscription.is_resending() {
                if let Err(e) = inner.send_initial_resend(&subscription) {
                    warn!(subscription = %subscription.id(), "Failed to request resend: {}", e);
                }
            }
        }
    }

    fn on_unsubscribed(&self, stream_id: &str, partition: u32) {
        let inner = &self.inner;
        for subscription in inner.subscriptions_of(stream_id, Some(partition)) {
            if subscription.state() != SubscriptionState::Unsubscribing {
                continue;
            }
            if subscription.transition(LifecycleEvent::UnsubscribeAcked).is_ok() {
                info!(subscription = %subscription.id(), stream_id, partition, "Unsubscribed");
                inner.remove(subscription.id());
            }
        }
    }

    fn on_reconnected(&self) {
        let inner = &self.inner;
        info!(inbox = %inner.inbox_stream_id, "Reconnected, restoring subscriptions");
        if let Err(e) = self.start() {
            warn!("Failed to resubscribe to key exchange stream: {}", e);
        }

        let ids: Vec<_> = inner.subscriptions.read().keys().copied().collect();
        for id in ids {
            if let Err(e) = inner.resubscribe(id) {
                warn!(subscription = %id, "Subscription not restored: {}", e);
            }
        }
    }
}

// =============================================================================
// SERVICE INTERNALS
// =============================================================================

impl ServiceInner {
    fn subscribe(
        self: &Arc<Self>,
        stream_id: &str,
        partition: u32,
        mode: DeliveryMode,
        events: Arc<dyn SubscriptionEvents>,
    ) -> Result<SubscriptionId, SubscriptionError> {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let subscription = Arc::new(self.build_subscription(id, stream_id, partition, mode, events));
        self.subscriptions.write().insert(id, Arc::clone(&subscription));
        stream_telemetry::ACTIVE_SUBSCRIPTIONS.inc();

        let sent = if subscription.mode().is_real_time() {
            self.transport.send(ControlMessage::Subscribe {
                stream_id: stream_id.to_string(),
                partition,
            })
        } else {
            // Historical delivery needs no real-time subscription.
            subscription
                .transition(LifecycleEvent::SubscribeAcked)
                .and_then(|_| self.send_initial_resend(&subscription))
        };
        if let Err(e) = sent {
            subscription.stop();
            self.forget_resends(id);
            self.remove(id);
            return Err(e);
        }

        info!(
            subscription = %id,
            stream_id,
            partition,
            mode = ?subscription.mode(),
            "Subscription created"
        );
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), SubscriptionError> {
        let subscription = self.get(id).ok_or(SubscriptionError::UnknownSubscription(id))?;
        subscription.transition(LifecycleEvent::UnsubscribeRequested)?;
        subscription.stop();
        self.forget_resends(id);

        if subscription.mode().is_real_time() {
            self.transport.send(ControlMessage::Unsubscribe {
                stream_id: subscription.stream_id().to_string(),
                partition: subscription.partition(),
            })
        } else {
            subscription.transition(LifecycleEvent::UnsubscribeAcked)?;
            self.remove(id);
            Ok(())
        }
    }

    fn resubscribe(self: &Arc<Self>, id: SubscriptionId) -> Result<(), SubscriptionError> {
        let old = self.get(id).ok_or(SubscriptionError::UnknownSubscription(id))?;
        let mode = old.mode_after_reconnect();
        old.transition(LifecycleEvent::ResubscribeRequested)?;

        let snapshot = old.chain_snapshot();
        old.stop();
        self.forget_resends(id);

        let recreated = Arc::new(self.build_subscription(
            id,
            old.stream_id(),
            old.partition(),
            mode,
            Arc::clone(old.events()),
        ));
        recreated.seed(&snapshot);
        self.subscriptions.write().insert(id, Arc::clone(&recreated));

        info!(
            subscription = %id,
            stream_id = %recreated.stream_id(),
            chains = snapshot.len(),
            "Resubscribing"
        );
        if recreated.mode().is_real_time() {
            self.transport.send(ControlMessage::Subscribe {
                stream_id: recreated.stream_id().to_string(),
                partition: recreated.partition(),
            })
        } else {
            // Already delivered messages of the repeated resend are stale.
            recreated.transition(LifecycleEvent::SubscribeAcked)?;
            self.send_initial_resend(&recreated)
        }
    }

    fn build_subscription(
        self: &Arc<Self>,
        id: SubscriptionId,
        stream_id: &str,
        partition: u32,
        mode: DeliveryMode,
        events: Arc<dyn SubscriptionEvents>,
    ) -> Subscription {
        let registry = Arc::new(PendingKeyRegistry::new(
            stream_id,
            self.config.decryption.clone(),
            Arc::clone(&self.key_store),
            Arc::new(MeteredKeyRequester {
                inner: Arc::clone(&self.key_exchange),
            }),
            Arc::new(EventsAdapter {
                subscription: id,
                events: Arc::clone(&events),
            }),
            Arc::clone(&self.key_exchange) as Arc<dyn sc_02_decryption::NextGroupKeyHandler>,
            self.scheduler.clone(),
        ));
        let primary = self.build_pipeline(id, stream_id, partition, PipelineKind::Primary, &registry);
        let history = matches!(mode, DeliveryMode::Combined(_))
            .then(|| self.build_pipeline(id, stream_id, partition, PipelineKind::History, &registry));
        Subscription::new(
            id,
            stream_id,
            partition,
            mode,
            events,
            &self.config.ordering,
            primary,
            history,
        )
    }

    fn build_pipeline(
        self: &Arc<Self>,
        id: SubscriptionId,
        stream_id: &str,
        partition: u32,
        kind: PipelineKind,
        registry: &Arc<PendingKeyRegistry>,
    ) -> Pipeline {
        let ordering = ChainMultiplexer::new(
            stream_id,
            partition,
            self.config.ordering.clone(),
            Arc::new(DecryptionStage {
                registry: Arc::clone(registry),
                key_exchange: Arc::clone(&self.key_exchange),
            }),
            Arc::new(ResendGapHandler {
                service: Arc::downgrade(self),
                target: GapTarget::Subscription(id, kind),
            }),
            self.scheduler.clone(),
        );
        Pipeline::new(ordering, Arc::clone(registry))
    }

    fn get(&self, id: SubscriptionId) -> Option<Arc<Subscription>> {
        self.subscriptions.read().get(&id).cloned()
    }

    /// Subscriptions of `stream_id`, optionally of one partition.
    fn subscriptions_of(&self, stream_id: &str, partition: Option<u32>) -> Vec<Arc<Subscription>> {
        self.subscriptions
            .read()
            .values()
            .filter(|s| s.stream_id() == stream_id && partition.map_or(true, |p| s.partition() == p))
            .cloned()
            .collect()
    }

    fn remove(&self, id: SubscriptionId) {
        if self.subscriptions.write().remove(&id).is_some() {
            stream_telemetry::ACTIVE_SUBSCRIPTIONS.dec();
        }
    }

    fn forget_resends(&self, id: SubscriptionId) {
        self.resends
            .lock()
            .retain(|_, r| !matches!(r.target, GapTarget::Subscription(s, _) if s == id));
    }

    fn register_resend(&self, target: GapTarget, initial: bool) -> RequestId {
        let request_id = RequestId(self.next_request.fetch_add(1, Ordering::Relaxed));
        self.resends
            .lock()
            .insert(request_id, PendingResend { target, initial });
        request_id
    }

    fn send_initial_resend(&self, subscription: &Subscription) -> Result<(), SubscriptionError> {
        let Some(spec) = subscription.mode().resend() else {
            return Ok(());
        };
        let request_id = self.register_resend(
            GapTarget::Subscription(subscription.id(), subscription.resend_pipeline()),
            true,
        );
        debug!(
            subscription = %subscription.id(),
            request_id = %request_id,
            spec = ?spec,
            "Requesting stored messages"
        );
        self.transport
            .send(spec.to_control(request_id, subscription.stream_id(), subscription.partition()))
    }

    /// Validation of data messages. Key exchange messages are validated by
    /// the coordinator.
    fn accept(&self, msg: &StreamMessage) -> bool {
        match self.validator.validate(msg) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    stream_id = %msg.stream_id(),
                    publisher_id = %msg.publisher_id(),
                    "Rejected message: {}",
                    e
                );
                false
            }
        }
    }

    /// Protocol messages are validated before ordering so a forged message
    /// cannot advance the chain past genuine ones.
    fn route_inbox(&self, msg: StreamMessage) {
        if !self.accept(&msg) {
            return;
        }
        if let Err(e) = self.inbox.route(msg) {
            warn!(inbox = %self.inbox_stream_id, "Key exchange stream ordering failed: {}", e);
        }
    }

    fn fail(&self, subscription: &Subscription, error: SubscriptionError) {
        error!(
            subscription = %subscription.id(),
            stream_id = %subscription.stream_id(),
            "Subscription failed: {}",
            error
        );
        subscription.events().on_error(subscription.id(), &error);

        if self.config.teardown_on_fatal && error.is_fatal() {
            if let Err(e) = self.unsubscribe(subscription.id()) {
                debug!(subscription = %subscription.id(), "Teardown skipped: {}", e);
            }
        }
    }

    /// Complete historical subscriptions that delivered everything.
    fn check_done_all(&self) {
        let all: Vec<_> = self.subscriptions.read().values().cloned().collect();
        for subscription in all {
            if subscription.check_done() {
                if let Err(e) = subscription.transition(LifecycleEvent::Completed) {
                    debug!(subscription = %subscription.id(), "Ignoring completion: {}", e);
                }
                self.forget_resends(subscription.id());
                self.remove(subscription.id());
            }
        }
    }

    fn request_gap_fill(&self, target: GapTarget, range: &GapRange) {
        let request_id = self.register_resend(target, false);
        stream_telemetry::GAP_FILL_REQUESTS.inc();
        debug!(request_id = %request_id, gap = %range, "Requesting gap fill");

        let control = ControlMessage::ResendRange {
            request_id,
            stream_id: range.stream_id.clone(),
            partition: range.partition,
            from: range.from,
            to: range.to,
            publisher_id: Some(range.publisher_id),
            msg_chain_id: Some(range.msg_chain_id.clone()),
        };
        if let Err(e) = self.transport.send(control) {
            warn!(request_id = %request_id, "Failed to send resend request: {}", e);
            self.resends.lock().remove(&request_id);
        }
    }

    fn gap_fill_failed(&self, target: GapTarget, error: &OrderingError) {
        stream_telemetry::UNRECOVERABLE_GAPS.inc();
        let GapTarget::Subscription(id, _) = target else {
            warn!(inbox = %self.inbox_stream_id, "Unrecoverable gap on key exchange stream: {}", error);
            return;
        };
        let Some(subscription) = self.get(id) else {
            return;
        };

        match self.config.ordering.gap_fill_failure {
            GapFillFailurePolicy::Fatal => self.fail(&subscription, error.clone().into()),
            GapFillFailurePolicy::Skip => self.check_done_all(),
        }
    }
}

impl NewKeysListener for ServiceInner {
    fn on_new_keys_added(&self, stream_id: &str, publisher_id: Address, key_ids: &[String]) {
        stream_telemetry::GROUP_KEYS_STORED.inc_by(key_ids.len() as u64);
        for subscription in self.subscriptions_of(stream_id, None) {
            subscription.on_new_keys_added(publisher_id, key_ids);
        }
    }

    fn on_key_exchange_failed(&self, stream_id: &str, publisher_id: Address, failure: &GroupKeyErrorResponse) {
        for subscription in self.subscriptions_of(stream_id, None) {
            subscription.on_key_exchange_failed(publisher_id, &failure.group_key_ids, &failure.error_message);
        }
    }
}

// =============================================================================
// ADAPTERS
// =============================================================================

/// Turns gaps into `ResendRange` requests.
struct ResendGapHandler {
    service: Weak<ServiceInner>,
    target: GapTarget,
}

impl GapHandler for ResendGapHandler {
    fn request_gap_fill(&self, range: &GapRange) {
        if let Some(service) = self.service.upgrade() {
            service.request_gap_fill(self.target, range);
        }
    }

    fn gap_fill_failed(&self, error: &OrderingError) {
        if let Some(service) = self.service.upgrade() {
            service.gap_fill_failed(self.target, error);
        }
    }
}

/// In-order messages of the local key exchange stream.
struct InboxDeliverer {
    key_exchange: Arc<KeyExchangeCoordinator>,
}

impl MessageDeliverer for InboxDeliverer {
    fn deliver(&self, msg: StreamMessage) {
        if let Err(e) = self.key_exchange.handle_protocol_message(&msg) {
            warn!(
                publisher_id = %msg.publisher_id(),
                message_type = ?msg.message_type(),
                "Key exchange message not handled: {}",
                e
            );
        }
    }
}

struct TransportPublisher {
    transport: Arc<dyn Transport>,
}

impl ProtocolPublisher for TransportPublisher {
    fn publish(&self, msg: StreamMessage) -> Result<(), KeyExchangeError> {
        self.transport
            .send(ControlMessage::Publish(msg))
            .map_err(|e| KeyExchangeError::Publish(e.to_string()))
    }
}
