//! # Protocol Payloads
//!
//! JSON content of the four key-exchange message types.
//!
//! | Type | Direction | Content encryption |
//! |------|-----------|--------------------|
//! | `GroupKeyRequest` | subscriber → publisher inbox | none |
//! | `GroupKeyResponse` | publisher → subscriber inbox | keys RSA-wrapped |
//! | `GroupKeyAnnounce` | publisher → subscriber inbox / data stream | keys RSA-wrapped or AES under a known key |
//! | `GroupKeyErrorResponse` | publisher → subscriber inbox | none |

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use shared_types::{EncryptedGroupKey, StreamMessage};

use crate::events::KeyExchangeError;

/// Error code for a request that cannot be served as sent.
pub const ERROR_INVALID_REQUEST: &str = "INVALID_GROUP_KEY_REQUEST";
/// Error code for a request naming no key the publisher knows.
pub const ERROR_KEY_NOT_FOUND: &str = "GROUP_KEY_NOT_FOUND";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupKeyRequest {
    pub request_id: String,
    /// Stream the keys are for (not the inbox stream).
    pub stream_id: String,
    /// Requester's RSA public key, SPKI PEM.
    pub rsa_public_key: String,
    pub group_key_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupKeyResponse {
    pub request_id: String,
    pub stream_id: String,
    pub encrypted_group_keys: Vec<EncryptedGroupKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupKeyAnnounce {
    pub stream_id: String,
    pub encrypted_group_keys: Vec<EncryptedGroupKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupKeyErrorResponse {
    pub request_id: String,
    pub stream_id: String,
    pub error_code: String,
    pub error_message: String,
    pub group_key_ids: Vec<String>,
}

/// Decode the JSON content of a protocol message.
pub fn decode_payload<T: DeserializeOwned>(msg: &StreamMessage) -> Result<T, KeyExchangeError> {
    serde_json::from_slice(msg.content()).map_err(|e| KeyExchangeError::Decode(e.to_string()))
}

/// Encode a payload as message content.
pub fn encode_payload<T: Serialize>(payload: &T) -> Result<Vec<u8>, KeyExchangeError> {
    serde_json::to_vec(payload).map_err(|e| KeyExchangeError::Decode(e.to_string()))
}
