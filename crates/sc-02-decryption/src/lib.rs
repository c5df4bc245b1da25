//! # Decryption Subsystem (sc-02)
//!
//! Decrypts in-order messages with the group keys of their stream. Messages
//! whose key is missing wait in a per key id queue while the key is requested
//! from the publisher a bounded number of times.
//!
//! ## Architecture Role
//!
//! ```text
//! [Ordering (1)] ──in order──→ [PendingKeyRegistry] ──decrypted──→ [Application]
//!                                   │        ↑
//!                       request key │        │ on_new_keys_added
//!                                   ↓        │
//!                              [Key Exchange (3)]
//! ```
//!
//! ## Guarantees
//!
//! - Messages of one key id are released in the order they arrived
//! - A message is decrypted at most twice; the second failure is reported,
//!   never retried
//! - Key requests per key id are bounded (`DecryptionConfig::max_key_requests`)

pub mod domain;
pub mod events;
pub mod ports;
pub mod service;

pub use domain::{decrypt_stream_message, encrypt_stream_message, DecryptionConfig};
pub use events::DecryptionError;
pub use ports::inbound::DecryptionGate;
pub use ports::outbound::{DecryptedMessageHandler, KeyRequester, NextGroupKeyHandler};
pub use service::PendingKeyRegistry;
