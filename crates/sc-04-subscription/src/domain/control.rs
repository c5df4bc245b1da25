//! Control messages the client sends through its transport.

use serde::{Deserialize, Serialize};
use shared_types::{Address, MessageRef, StreamMessage};

use super::RequestId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    Subscribe {
        stream_id: String,
        partition: u32,
    },
    Unsubscribe {
        stream_id: String,
        partition: u32,
    },
    /// The last `count` messages of the partition.
    ResendLast {
        request_id: RequestId,
        stream_id: String,
        partition: u32,
        count: u64,
    },
    /// Everything from `from` on, optionally of one publisher.
    ResendFrom {
        request_id: RequestId,
        stream_id: String,
        partition: u32,
        from: MessageRef,
        publisher_id: Option<Address>,
    },
    /// Messages between `from` and `to` inclusive.
    ResendRange {
        request_id: RequestId,
        stream_id: String,
        partition: u32,
        from: MessageRef,
        to: MessageRef,
        publisher_id: Option<Address>,
        msg_chain_id: Option<String>,
    },
    Publish(StreamMessage),
}

impl ControlMessage {
    /// Request id of a resend request.
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            ControlMessage::ResendLast { request_id, .. }
            | ControlMessage::ResendFrom { request_id, .. }
            | ControlMessage::ResendRange { request_id, .. } => Some(*request_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_json() {
        let control = ControlMessage::ResendLast {
            request_id: RequestId(4),
            stream_id: "s".to_string(),
            partition: 0,
            count: 10,
        };
        let json = serde_json::to_value(&control).unwrap();
        assert_eq!(json["type"], "ResendLast");
        assert_eq!(json["count"], 10);
        assert_eq!(control.request_id(), Some(RequestId(4)));

        let back: ControlMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, control);
    }
}
