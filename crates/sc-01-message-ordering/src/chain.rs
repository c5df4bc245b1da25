//! # Message Chain
//!
//! Orders the messages of one `(publisher, msg chain id)` pair and chases
//! gaps with resend requests.
//!
//! ## Gap Timer
//!
//! ```text
//! gap detected ──propagation_timeout──→ fire ──resend_timeout──→ fire ...
//!                                        │
//!                                        ├─ queue drained      → stop
//!                                        ├─ requests < max     → request [from .. to]
//!                                        └─ requests == max    → Fatal: halt chain
//!                                                                Skip:  advance past gap
//! ```
//!
//! The timer fires under the chain lock and checks that it is still the
//! chain's gap timer, so a gap closed by an arriving message cancels it for
//! good. Resend requests and failure reports run after the lock is released.

use std::sync::Arc;

use parking_lot::Mutex;
use shared_scheduler::{Scheduler, Tick, TimerId};
use shared_types::{ChainId, MessageRef, StreamMessage};
use tracing::{debug, error, warn};

use crate::domain::{
    AddOutcome, ChainState, GapFillFailurePolicy, GapRange, OrderingConfig, QueueOverflowPolicy,
};
use crate::events::OrderingError;
use crate::ports::outbound::{GapHandler, MessageDeliverer};

/// Collaborators and configuration shared by all chains of a multiplexer.
pub(crate) struct ChainContext {
    pub stream_id: String,
    pub partition: u32,
    pub config: OrderingConfig,
    pub deliverer: Arc<dyn MessageDeliverer>,
    pub gap_handler: Arc<dyn GapHandler>,
    pub scheduler: Scheduler,
}

/// Side effect of a gap timer firing, run outside the chain lock.
enum GapEvent {
    None,
    Request(GapRange),
    Failed(OrderingError),
}

impl ChainContext {
    fn dispatch(&self, event: GapEvent) {
        match event {
            GapEvent::None => {}
            GapEvent::Request(range) => self.gap_handler.request_gap_fill(&range),
            GapEvent::Failed(error) => self.gap_handler.gap_fill_failed(&error),
        }
    }
}

/// One ordered chain.
pub struct MessageChain {
    ctx: Arc<ChainContext>,
    state: Arc<Mutex<ChainState>>,
}

impl MessageChain {
    pub(crate) fn new(
        ctx: Arc<ChainContext>,
        chain_id: ChainId,
        last_delivered: Option<MessageRef>,
    ) -> Self {
        Self {
            ctx,
            state: Arc::new(Mutex::new(ChainState::new(chain_id, last_delivered))),
        }
    }

    pub fn chain_id(&self) -> ChainId {
        self.state.lock().chain_id().clone()
    }

    pub fn last_delivered(&self) -> Option<MessageRef> {
        self.state.lock().last_delivered()
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().queue_len()
    }

    pub fn has_gap(&self) -> bool {
        self.state.lock().has_gap()
    }

    pub fn is_halted(&self) -> bool {
        self.state.lock().is_halted()
    }

    /// Offer a message to the chain.
    ///
    /// Delivers it (and every queued successor) if it is next, drops it if
    /// stale or already queued, and queues it otherwise.
    ///
    /// # Errors
    ///
    /// - `ChainHalted` once an unrecoverable gap halted the chain
    /// - `QueueFull` when the queue is at capacity under the strict policy
    pub fn add(&self, msg: StreamMessage) -> Result<AddOutcome, OrderingError> {
        let mut state = self.state.lock();

        if state.is_halted() {
            return Err(OrderingError::ChainHalted(state.chain_id().clone()));
        }

        if state.is_stale(&msg) || state.is_queued(&msg) {
            debug!(
                chain = %state.chain_id(),
                msg_ref = %msg.message_ref(),
                "Dropping duplicate or stale message"
            );
            return Ok(AddOutcome::Dropped);
        }

        let mut deliver = |m: StreamMessage| self.ctx.deliverer.deliver(m);

        if state.is_next(&msg) {
            state.deliver(msg, &mut deliver);
            let drained = state.drain(&mut deliver);
            if drained > 0 && state.queue_len() > 0 {
                // The chased gap closed; what is left is a new gap.
                self.start_gap_timer(&mut state);
            }
            return Ok(AddOutcome::Delivered { drained });
        }

        if state.queue_len() >= self.ctx.config.max_queue_size {
            match self.ctx.config.queue_overflow {
                QueueOverflowPolicy::Strict => {
                    return Err(OrderingError::QueueFull {
                        chain: state.chain_id().clone(),
                        max: self.ctx.config.max_queue_size,
                    });
                }
                QueueOverflowPolicy::Reset => {
                    let dropped = state.reset_queue();
                    warn!(
                        chain = %state.chain_id(),
                        dropped,
                        msg_ref = %msg.message_ref(),
                        "Out-of-order queue full, restarting chain from newest message"
                    );
                    state.deliver(msg, &mut deliver);
                    return Ok(AddOutcome::Delivered { drained: 0 });
                }
            }
        }

        debug!(
            chain = %state.chain_id(),
            msg_ref = %msg.message_ref(),
            prev_ref = ?msg.prev_msg_ref(),
            "Queueing out-of-order message"
        );
        state.enqueue(msg);
        if !state.has_gap() {
            self.start_gap_timer(&mut state);
        }
        Ok(AddOutcome::Queued)
    }

    /// Continue from `last`: drop queued messages up to it and deliver what
    /// became next.
    pub fn seed(&self, last: MessageRef) {
        let mut state = self.state.lock();
        state.advance_to(last);
        let mut deliver = |m: StreamMessage| self.ctx.deliverer.deliver(m);
        state.drain(&mut deliver);
    }

    /// Cancel the gap timer; no new one is started afterwards.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        state.clear_gap();
    }

    fn start_gap_timer(&self, state: &mut ChainState) {
        if state.stopped {
            return;
        }
        state.gap_request_count = 0;

        let fire_ctx = Arc::clone(&self.ctx);
        let after_ctx = Arc::clone(&self.ctx);
        let handle = self.ctx.scheduler.spawn_periodic(
            &self.state,
            self.ctx.config.propagation_timeout,
            self.ctx.config.resend_timeout,
            move |state: &mut ChainState, id| on_gap_timer(&fire_ctx, state, id),
            move |event| after_ctx.dispatch(event),
        );
        debug!(chain = %state.chain_id(), timer = %handle.id(), "Gap detected, timer started");
        state.gap_timer.set(handle);
    }
}

fn on_gap_timer(ctx: &ChainContext, state: &mut ChainState, id: TimerId) -> (Tick, GapEvent) {
    let mut deliver = |m: StreamMessage| ctx.deliverer.deliver(m);

    let drained = state.drain(&mut deliver);
    if drained > 0 {
        state.gap_request_count = 0;
    }

    let Some(range) = state.gap_range(&ctx.stream_id, ctx.partition) else {
        state.gap_timer.release(id);
        return (Tick::Stop, GapEvent::None);
    };

    if state.gap_request_count < ctx.config.max_gap_requests {
        state.gap_request_count += 1;
        debug!(
            chain = %state.chain_id(),
            from = %range.from,
            to = %range.to,
            attempt = state.gap_request_count,
            "Requesting gap fill"
        );
        return (Tick::Continue, GapEvent::Request(range));
    }

    let error = OrderingError::GapFillFailed {
        chain: state.chain_id().clone(),
        from: range.from,
        to: range.to,
        attempts: state.gap_request_count,
    };
    state.gap_request_count = 0;

    match ctx.config.gap_fill_failure {
        GapFillFailurePolicy::Fatal => {
            error!(chain = %state.chain_id(), from = %range.from, to = %range.to, "Unrecoverable gap, halting chain");
            state.halted = true;
            state.gap_timer.release(id);
            (Tick::Stop, GapEvent::Failed(error))
        }
        GapFillFailurePolicy::Skip => {
            warn!(chain = %state.chain_id(), from = %range.from, to = %range.to, "Unrecoverable gap, skipping");
            state.advance_to(range.to);
            state.drain(&mut deliver);
            // A further gap behind the skipped one keeps this timer.
            let tick = if state.has_gap() { Tick::Continue } else { Tick::Stop };
            (tick, GapEvent::Failed(error))
        }
    }
}
