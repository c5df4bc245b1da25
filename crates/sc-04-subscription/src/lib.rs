//! # Subscription Subsystem (sc-04)
//!
//! Client-side entry point: subscriptions to stream partitions in real-time,
//! historical or combined mode, the receive pipeline behind each of them and
//! the publish path.
//!
//! ## Architecture Role
//!
//! ```text
//!              on_message / on_resent_message / acks
//! [Transport] ──────────────────────────────────────→ [SubscriptionService]
//!      ↑                                                   │
//!      │ Subscribe / Resend* / Publish                     ↓ per subscription
//!      └──────────────────────────────────── [Ordering (1)] → [Decryption (2)] → SubscriptionEvents
//!                                                   │                ↑
//!                                                   │ announces      │ new keys
//!                                                   └──→ [Key Exchange (3)]
//! ```
//!
//! ## Lock Order
//!
//! Subscription phase → chain → pending keys. The subscription map is never
//! held while a pipeline runs, and the transport must not call back into the
//! service from `send`.

pub mod domain;
pub mod events;
mod pipeline;
pub mod ports;
pub mod publisher;
pub mod service;
pub mod subscription;

#[cfg(test)]
mod test_support;

pub use domain::{
    ClientConfig, ControlMessage, DeliveryMode, LifecycleEvent, RequestId, ResendSpec, SubscriptionId,
    SubscriptionState,
};
pub use events::SubscriptionError;
pub use ports::inbound::{SubscriptionApi, TransportListener};
pub use ports::outbound::{SubscriptionEvents, Transport};
pub use publisher::StreamPublisher;
pub use service::SubscriptionService;
pub use subscription::Subscription;
