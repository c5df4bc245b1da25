//! # Key Exchange Subsystem (sc-03)
//!
//! Distributes symmetric group keys between publishers and subscribers over
//! per-address key exchange streams (`SYSTEM/keyexchange/<address>`).
//!
//! ## Architecture Role
//!
//! ```text
//!                  request_keys                     signed GroupKeyRequest
//! [Decryption (2)] ───────────→ [Coordinator] ─────────────────────────→ [Transport]
//!        ↑                          │    ↑
//!        │ on_new_keys_added        │    │ response / announce / error-response
//!        └──── [NewKeysListener] ←──┘    └──── [Subscription (4)] ←── inbox
//! ```
//!
//! ## Protocol
//!
//! | Message | Carries | Encryption of keys |
//! |---------|---------|--------------------|
//! | Request | requester RSA public key, missing key ids | - |
//! | Response | requested keys | RSA-OAEP per requester |
//! | Announce | new key (rekey / rotation) | RSA-OAEP, or AES under a known key |
//! | ErrorResponse | error code, key ids | - |
//!
//! Every protocol message is signed and checked by a [`MessageValidator`]
//! before it is handled.

pub mod domain;
pub mod events;
pub mod factory;
pub mod ports;
pub mod service;
pub mod validator;

#[cfg(test)]
mod test_support;

pub use domain::{
    decode_payload, encode_payload, GroupKeyAnnounce, GroupKeyErrorResponse, GroupKeyRequest,
    GroupKeyResponse, KeyExchangeConfig, SubscriberKeyCache, ERROR_INVALID_REQUEST,
    ERROR_KEY_NOT_FOUND,
};
pub use events::KeyExchangeError;
pub use factory::ProtocolMessageFactory;
pub use ports::inbound::KeyExchangeApi;
pub use ports::outbound::{MessageValidator, NewKeysListener, PermissionOracle, ProtocolPublisher};
pub use service::KeyExchangeCoordinator;
pub use validator::StreamMessageValidator;
