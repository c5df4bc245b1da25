//! Subscription lifecycle.
//!
//! ```text
//!               SubscribeAcked                UnsubscribeRequested
//! Subscribing ────────────────→ Subscribed ──────────────────────→ Unsubscribing
//!      │  ↑                        │    │                                │
//!      │  └── ResubscribeRequested ┘    │ Completed                      │ UnsubscribeAcked
//!      │                                ↓                                ↓
//!      └── UnsubscribeRequested ──→ (Unsubscribing)               Unsubscribed
//! ```

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionState {
    Subscribing,
    Subscribed,
    Unsubscribing,
    Unsubscribed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The transport confirmed the subscription.
    SubscribeAcked,
    UnsubscribeRequested,
    /// The transport confirmed the unsubscription.
    UnsubscribeAcked,
    /// The connection was re-established and the subscription is sent again.
    ResubscribeRequested,
    /// A historical subscription delivered everything it asked for.
    Completed,
}

impl SubscriptionState {
    /// The state after `event`, or `None` if `event` is not allowed now.
    pub fn on(self, event: LifecycleEvent) -> Option<Self> {
        use LifecycleEvent::*;
        use SubscriptionState::*;

        match (self, event) {
            (Subscribing, SubscribeAcked) => Some(Subscribed),
            (Subscribing | Subscribed, UnsubscribeRequested) => Some(Unsubscribing),
            (Subscribing | Subscribed, ResubscribeRequested) => Some(Subscribing),
            (Unsubscribing, UnsubscribeAcked) => Some(Unsubscribed),
            (Subscribed, Completed) => Some(Unsubscribed),
            _ => None,
        }
    }

    /// Whether incoming messages are processed.
    pub fn accepts_messages(self) -> bool {
        self == SubscriptionState::Subscribed
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubscriptionState::Subscribing => "subscribing",
            SubscriptionState::Subscribed => "subscribed",
            SubscriptionState::Unsubscribing => "unsubscribing",
            SubscriptionState::Unsubscribed => "unsubscribed",
        };
        f.write_str(name)
    }
}
