//! # Domain Layer for Key Exchange
//!
//! - **payloads**: JSON content of request / response / announce / error-response
//! - **subscriber_keys**: RSA public keys learned from requests, per stream
//! - **value_objects**: `KeyExchangeConfig`

mod payloads;
mod subscriber_keys;
mod value_objects;

pub use payloads::*;
pub use subscriber_keys::*;
pub use value_objects::*;
