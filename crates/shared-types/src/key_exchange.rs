//! # Key-Exchange Streams
//!
//! Every address owns a reserved stream `<prefix><address>` that carries the
//! group-key request/response/announce protocol addressed to it.

use crate::entities::Address;

/// Prefix of all key-exchange stream ids.
pub const KEY_EXCHANGE_STREAM_PREFIX: &str = "SYSTEM/keyexchange/";

/// Stream id of the key-exchange inbox of `address`.
pub fn key_exchange_stream_id(address: &Address) -> String {
    format!("{}{}", KEY_EXCHANGE_STREAM_PREFIX, address)
}

/// Whether `stream_id` is a key-exchange inbox.
pub fn is_key_exchange_stream(stream_id: &str) -> bool {
    stream_id.starts_with(KEY_EXCHANGE_STREAM_PREFIX)
}

/// Owner of a key-exchange inbox, `None` for ordinary streams.
pub fn key_exchange_recipient(stream_id: &str) -> Option<Address> {
    stream_id
        .strip_prefix(KEY_EXCHANGE_STREAM_PREFIX)
        .and_then(|address| address.parse().ok())
}
