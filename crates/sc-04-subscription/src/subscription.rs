//! # Subscription
//!
//! One subscription to a stream partition in one [`DeliveryMode`].
//!
//! | Mode | Pipelines | Real-time messages while resending | Ends |
//! |------|-----------|------------------------------------|------|
//! | `RealTime` | primary | - | on unsubscribe |
//! | `Historical` | primary (fed by the resend) | ignored | `on_done` once drained |
//! | `Combined` | history + primary | buffered | on unsubscribe |
//!
//! In combined mode the end of the resend is the seam: under the phase lock
//! the primary chains are seeded from the history chains, then the buffered
//! real-time messages are replayed. Messages the resend already delivered are
//! dropped as stale; anything missing shows up as a gap.
//!
//! The buffer holds at most `max_queue_size` messages. When full, the strict
//! overflow policy fails the subscription; the reset policy drops the oldest
//! buffered message and leaves the hole to gap filling after the seam.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use sc_01_message_ordering::{OrderingConfig, OrderingError, QueueOverflowPolicy};
use shared_types::{Address, ChainId, MessageRef, StreamMessage};
use tracing::{debug, info, warn};

use crate::domain::{DeliveryMode, LifecycleEvent, SubscriptionId, SubscriptionState};
use crate::events::SubscriptionError;
use crate::pipeline::{Pipeline, PipelineKind};
use crate::ports::outbound::SubscriptionEvents;

enum Phase {
    Live,
    /// The initial resend is running.
    Resending { buffered: VecDeque<StreamMessage> },
    /// Historical mode: the resend finished, queued messages still drain.
    Draining,
    Done,
}

pub struct Subscription {
    id: SubscriptionId,
    stream_id: String,
    partition: u32,
    mode: DeliveryMode,
    events: Arc<dyn SubscriptionEvents>,
    state: Mutex<SubscriptionState>,
    phase: Mutex<Phase>,
    buffer_limit: usize,
    buffer_overflow: QueueOverflowPolicy,
    primary: Pipeline,
    history: Option<Pipeline>,
}

impl Subscription {
    pub(crate) fn new(
        id: SubscriptionId,
        stream_id: impl Into<String>,
        partition: u32,
        mode: DeliveryMode,
        events: Arc<dyn SubscriptionEvents>,
        ordering: &OrderingConfig,
        primary: Pipeline,
        history: Option<Pipeline>,
    ) -> Self {
        let phase = match mode {
            DeliveryMode::RealTime => Phase::Live,
            DeliveryMode::Historical(_) | DeliveryMode::Combined(_) => Phase::Resending {
                buffered: VecDeque::new(),
            },
        };
        Self {
            id,
            stream_id: stream_id.into(),
            partition,
            mode,
            events,
            state: Mutex::new(SubscriptionState::Subscribing),
            phase: Mutex::new(phase),
            buffer_limit: ordering.max_queue_size,
            buffer_overflow: ordering.queue_overflow,
            primary,
            history,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    pub fn mode(&self) -> &DeliveryMode {
        &self.mode
    }

    pub fn state(&self) -> SubscriptionState {
        *self.state.lock()
    }

    /// Whether the initial resend is still running.
    pub fn is_resending(&self) -> bool {
        matches!(*self.phase.lock(), Phase::Resending { .. })
    }

    /// Whether a historical subscription delivered everything.
    pub fn is_done(&self) -> bool {
        matches!(*self.phase.lock(), Phase::Done)
    }

    /// Messages waiting for a predecessor.
    pub fn queued_messages(&self) -> usize {
        self.pipelines().map(Pipeline::queued_messages).sum()
    }

    /// Messages waiting for a group key.
    pub fn pending_decryption(&self) -> usize {
        self.primary.pending_decryption()
    }

    /// Last delivered ref of every chain, for recreating the subscription.
    pub fn chain_snapshot(&self) -> HashMap<ChainId, MessageRef> {
        let mut snapshot = self.primary.snapshot();
        if let Some(history) = &self.history {
            for (chain, last) in history.snapshot() {
                let entry = snapshot.entry(chain).or_insert(last);
                *entry = (*entry).max(last);
            }
        }
        snapshot
    }

    pub(crate) fn events(&self) -> &Arc<dyn SubscriptionEvents> {
        &self.events
    }

    pub(crate) fn seed(&self, snapshot: &HashMap<ChainId, MessageRef>) {
        self.primary.seed(snapshot);
    }

    pub(crate) fn transition(&self, event: LifecycleEvent) -> Result<SubscriptionState, SubscriptionError> {
        let mut state = self.state.lock();
        let next = state.on(event).ok_or(SubscriptionError::InvalidState {
            subscription: self.id,
            state: *state,
            event,
        })?;
        debug!(subscription = %self.id, from = %*state, to = %next, "Subscription state change");
        *state = next;
        Ok(next)
    }

    /// Pipeline the initial resend feeds.
    pub(crate) fn resend_pipeline(&self) -> PipelineKind {
        match self.mode {
            DeliveryMode::Combined(_) => PipelineKind::History,
            _ => PipelineKind::Primary,
        }
    }

    /// Mode of the subscription recreated after a reconnect. A combined
    /// subscription past its resend continues in real time.
    pub(crate) fn mode_after_reconnect(&self) -> DeliveryMode {
        match &self.mode {
            DeliveryMode::Combined(_) if !self.is_resending() => DeliveryMode::RealTime,
            mode => mode.clone(),
        }
    }

    // =========================================================================
    // INGEST
    // =========================================================================

    pub(crate) fn handle_realtime(&self, msg: StreamMessage) -> Result<(), SubscriptionError> {
        if !self.state().accepts_messages() {
            debug!(subscription = %self.id, "Dropping message outside the subscribed state");
            return Ok(());
        }

        let mut phase = self.phase.lock();
        match (&mut *phase, &self.mode) {
            (Phase::Live, _) => {
                self.primary.route(msg)?;
            }
            (Phase::Resending { buffered }, DeliveryMode::Combined(_)) => {
                if buffered.len() >= self.buffer_limit {
                    stream_telemetry::QUEUE_OVERFLOWS.inc();
                    match self.buffer_overflow {
                        QueueOverflowPolicy::Strict => {
                            return Err(OrderingError::QueueFull {
                                chain: msg.chain_id(),
                                max: self.buffer_limit,
                            }
                            .into());
                        }
                        QueueOverflowPolicy::Reset => {
                            if let Some(dropped) = buffered.pop_front() {
                                warn!(
                                    subscription = %self.id,
                                    chain = %dropped.chain_id(),
                                    msg_ref = %dropped.message_ref(),
                                    "Real-time buffer full, dropping oldest message"
                                );
                            }
                        }
                    }
                }
                buffered.push_back(msg);
            }
            _ => debug!(subscription = %self.id, "Historical subscription ignores real-time message"),
        }
        Ok(())
    }

    pub(crate) fn handle_resent(&self, kind: PipelineKind, msg: StreamMessage) -> Result<(), SubscriptionError> {
        if !self.state().accepts_messages() {
            return Ok(());
        }
        let pipeline = match (kind, &self.history) {
            (PipelineKind::History, Some(history)) => history,
            _ => &self.primary,
        };
        pipeline.route(msg)?;
        Ok(())
    }

    /// The initial resend completed.
    pub(crate) fn end_resend(&self) -> Result<(), SubscriptionError> {
        let mut phase = self.phase.lock();
        let buffered = match std::mem::replace(&mut *phase, Phase::Live) {
            Phase::Resending { buffered } => buffered,
            other => {
                *phase = other;
                return Ok(());
            }
        };

        if matches!(self.mode, DeliveryMode::Historical(_)) {
            *phase = Phase::Draining;
            debug!(subscription = %self.id, "Resend finished, draining");
            return Ok(());
        }

        if let Some(history) = &self.history {
            self.primary.seed(&history.snapshot());
            history.stop_ordering();
        }
        info!(
            subscription = %self.id,
            stream_id = %self.stream_id,
            buffered = buffered.len(),
            "Resend finished, switching to real-time"
        );

        let mut first_error = None;
        for msg in buffered {
            if let Err(e) = self.primary.route(msg) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Fire `on_done` once a drained historical subscription has nothing
    /// left. Returns whether it fired.
    pub(crate) fn check_done(&self) -> bool {
        {
            let mut phase = self.phase.lock();
            if !matches!(*phase, Phase::Draining) || !self.primary.is_drained() {
                return false;
            }
            *phase = Phase::Done;
        }
        info!(subscription = %self.id, stream_id = %self.stream_id, "Historical subscription done");
        self.events.on_done(self.id);
        true
    }

    // =========================================================================
    // KEYS AND TEARDOWN
    // =========================================================================

    // Both pipelines feed the same decryption registry.
    pub(crate) fn on_new_keys_added(&self, publisher_id: Address, key_ids: &[String]) {
        self.primary.on_new_keys_added(publisher_id, key_ids);
    }

    pub(crate) fn on_key_exchange_failed(&self, publisher_id: Address, key_ids: &[String], reason: &str) {
        self.primary.on_key_exchange_failed(publisher_id, key_ids, reason);
    }

    /// Cancel every timer of the subscription.
    pub(crate) fn stop(&self) {
        if let Some(history) = &self.history {
            history.stop_ordering();
        }
        self.primary.stop();
    }

    fn pipelines(&self) -> impl Iterator<Item = &Pipeline> {
        std::iter::once(&self.primary).chain(self.history.iter())
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("partition", &self.partition)
            .field("mode", &self.mode)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
