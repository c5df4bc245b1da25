//! # Pending Keys
//!
//! Messages whose group key is not available wait here, one FIFO per key id,
//! until the key arrives.
//!
//! A key id is marked *failed* when a message first fails to decrypt with it.
//! While the mark is set, another failure for that key id is terminal for the
//! message, so a message is decrypted at most twice.

use std::collections::{HashMap, HashSet, VecDeque};

use shared_scheduler::{TimerId, TimerOwner, TimerSlot};
use shared_types::{Address, StreamMessage};

/// Messages waiting for one key id.
#[derive(Debug)]
pub struct PendingKey {
    pub publisher_id: Address,
    pub queue: VecDeque<StreamMessage>,
    pub timer: TimerSlot,
    /// Key requests sent so far.
    pub attempts: u32,
}

impl PendingKey {
    pub fn new(publisher_id: Address) -> Self {
        Self {
            publisher_id,
            queue: VecDeque::new(),
            timer: TimerSlot::new(),
            attempts: 0,
        }
    }
}

/// State of one decryption gate, guarded by the gate's lock.
#[derive(Debug, Default)]
pub struct PendingKeyState {
    pub pending: HashMap<String, PendingKey>,
    pub failed: HashSet<String>,
    pub stopped: bool,
}

impl PendingKeyState {
    /// Messages waiting for any key.
    pub fn pending_messages(&self) -> usize {
        self.pending.values().map(|p| p.queue.len()).sum()
    }

    pub fn is_waiting_for(&self, key_id: &str) -> bool {
        self.pending.contains_key(key_id)
    }

    /// Cancel every key-request timer. Waiting messages stay queued.
    pub fn cancel_timers(&mut self) {
        for pending in self.pending.values_mut() {
            pending.timer.cancel();
        }
    }
}

impl TimerOwner for PendingKeyState {
    fn owns_timer(&self, id: TimerId) -> bool {
        !self.stopped && self.pending.values().any(|p| p.timer.is_current(id))
    }
}
