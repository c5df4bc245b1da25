//! # Shared Scheduler
//!
//! Periodic timers for gap-fill retries and key-request retries.
//!
//! ## Cancellation Model
//!
//! A timer belongs to some state `T` guarded by a `parking_lot::Mutex`. The
//! state records the timer it currently runs in a [`TimerSlot`]. When the
//! timer fires it:
//!
//! 1. upgrades its weak reference to the owner (dropped owner => timer ends),
//! 2. locks the owner,
//! 3. asks [`TimerOwner::owns_timer`] whether it is still the current timer,
//! 4. only then runs its callback, still under the lock.
//!
//! Cancelling a slot under the owner's lock therefore guarantees the timer
//! never acts again, even if its task already woke up and is waiting for the
//! lock. Cancelling additionally aborts the task.
//!
//! Side effects that must not run under the owner's lock (calls into outbound
//! ports) are returned from the callback and handed to a second closure after
//! the lock is released.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::trace;

// =============================================================================
// TIMER IDENTITY
// =============================================================================

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique timer identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    fn next() -> Self {
        Self(NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// What a timer does after a firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Fire again after the period.
    Continue,
    /// End the timer.
    Stop,
}

/// State that owns timers.
pub trait TimerOwner: Send + 'static {
    /// Whether `id` is still a live timer of this owner.
    ///
    /// Called under the owner's lock each time the timer fires.
    fn owns_timer(&self, id: TimerId) -> bool;
}

// =============================================================================
// TIMER SLOT
// =============================================================================

/// A running timer: its id plus the task driving it.
#[derive(Debug)]
pub struct TimerHandle {
    id: TimerId,
    task: JoinHandle<()>,
}

impl TimerHandle {
    pub fn id(&self) -> TimerId {
        self.id
    }
}

/// Holds at most one running timer.
///
/// Dropping the slot cancels the timer.
#[derive(Debug, Default)]
pub struct TimerSlot {
    current: Option<TimerHandle>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a timer is running.
    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    /// Whether `id` is the timer held by this slot.
    pub fn is_current(&self, id: TimerId) -> bool {
        self.current.as_ref().is_some_and(|handle| handle.id == id)
    }

    /// Install `handle`, cancelling any timer held before.
    pub fn set(&mut self, handle: TimerHandle) {
        self.cancel();
        self.current = Some(handle);
    }

    /// Cancel the held timer. Returns whether there was one.
    pub fn cancel(&mut self) -> bool {
        match self.current.take() {
            Some(handle) => {
                handle.task.abort();
                trace!(timer = %handle.id, "Timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Forget `id` without aborting its task.
    ///
    /// Used by a timer that ends itself from inside its own callback.
    pub fn release(&mut self, id: TimerId) {
        if self.is_current(id) {
            self.current = None;
        }
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

// =============================================================================
// SCHEDULER
// =============================================================================

/// Scheduler errors.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Created outside a Tokio runtime.
    #[error("No Tokio runtime available: {0}")]
    NoRuntime(String),
}

/// Spawns timers onto a Tokio runtime.
#[derive(Debug, Clone)]
pub struct Scheduler {
    runtime: Handle,
}

impl Scheduler {
    /// Scheduler on an explicit runtime.
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Scheduler on the runtime of the calling context.
    pub fn from_current() -> Result<Self, SchedulerError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| SchedulerError::NoRuntime(e.to_string()))
    }

    /// Start a periodic timer owned by `owner`.
    ///
    /// The timer first fires after `first`, then every `period` while `fire`
    /// returns [`Tick::Continue`]. `fire` runs under the owner's lock; the
    /// value it returns is passed to `after` once the lock is released.
    ///
    /// The caller must install the returned handle in the owner's
    /// [`TimerSlot`] before releasing the owner's lock, otherwise the first
    /// firing finds `owns_timer` false and the timer ends.
    pub fn spawn_periodic<T, R, F, A>(
        &self,
        owner: &Arc<Mutex<T>>,
        first: Duration,
        period: Duration,
        mut fire: F,
        mut after: A,
    ) -> TimerHandle
    where
        T: TimerOwner,
        R: Send + 'static,
        F: FnMut(&mut T, TimerId) -> (Tick, R) + Send + 'static,
        A: FnMut(R) + Send + 'static,
    {
        let id = TimerId::next();
        let owner = Arc::downgrade(owner);

        let task = self.runtime.spawn(async move {
            let mut delay = first;
            loop {
                tokio::time::sleep(delay).await;

                let Some(strong) = owner.upgrade() else {
                    trace!(timer = %id, "Timer owner dropped");
                    break;
                };

                let (tick, effect) = {
                    let mut state = strong.lock();
                    if !state.owns_timer(id) {
                        trace!(timer = %id, "Stale timer fired, ignoring");
                        break;
                    }
                    fire(&mut state, id)
                };
                drop(strong);

                after(effect);

                if tick == Tick::Stop {
                    break;
                }
                delay = period;
            }
        });

        TimerHandle { id, task }
    }
}
