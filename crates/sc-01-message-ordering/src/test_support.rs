//! Recording port implementations for unit tests.

use parking_lot::Mutex;
use shared_types::{Address, ChainId, MessageId, MessageRef, StreamMessage};
use tokio::time::Instant;

use crate::domain::GapRange;
use crate::events::OrderingError;
use crate::ports::outbound::{GapHandler, MessageDeliverer};

pub fn publisher() -> Address {
    Address::new([0xAA; 20])
}

pub fn chain_id() -> ChainId {
    ChainId::new(publisher(), "chain-1")
}

/// Message of the default test chain at `(ts, 0)` with predecessor `(prev, 0)`.
pub fn msg(ts: i64, prev: Option<i64>) -> StreamMessage {
    msg_on(publisher(), "chain-1", ts, prev)
}

pub fn msg_on(publisher: Address, chain: &str, ts: i64, prev: Option<i64>) -> StreamMessage {
    StreamMessage::builder(MessageId::new(
        "stream",
        0,
        MessageRef::new(ts, 0),
        publisher,
        chain,
    ))
    .prev_msg_ref(prev.map(|p| MessageRef::new(p, 0)))
    .content(format!("payload-{}", ts))
    .build()
}

#[derive(Default)]
pub struct RecordingDeliverer {
    delivered: Mutex<Vec<StreamMessage>>,
}

impl RecordingDeliverer {
    pub fn timestamps(&self) -> Vec<i64> {
        self.delivered
            .lock()
            .iter()
            .map(|m| m.message_ref().timestamp)
            .collect()
    }

    pub fn delivered(&self) -> Vec<StreamMessage> {
        self.delivered.lock().clone()
    }
}

impl MessageDeliverer for RecordingDeliverer {
    fn deliver(&self, msg: StreamMessage) {
        self.delivered.lock().push(msg);
    }
}

#[derive(Default)]
pub struct RecordingGapHandler {
    requests: Mutex<Vec<(GapRange, Instant)>>,
    failures: Mutex<Vec<OrderingError>>,
}

impl RecordingGapHandler {
    pub fn requests(&self) -> Vec<GapRange> {
        self.requests.lock().iter().map(|(r, _)| r.clone()).collect()
    }

    pub fn request_times(&self) -> Vec<Instant> {
        self.requests.lock().iter().map(|(_, t)| *t).collect()
    }

    pub fn failures(&self) -> Vec<OrderingError> {
        self.failures.lock().clone()
    }
}

impl GapHandler for RecordingGapHandler {
    fn request_gap_fill(&self, range: &GapRange) {
        self.requests.lock().push((range.clone(), Instant::now()));
    }

    fn gap_fill_failed(&self, error: &OrderingError) {
        self.failures.lock().push(error.clone());
    }
}
