//! # Core Domain Entities
//!
//! Identity and position types for stream messages.
//!
//! ## Entities
//!
//! - [`Address`]: 20-byte Ethereum-style account address of a publisher or subscriber
//! - [`MessageRef`]: `(timestamp, sequence_number)`, the total order key of a chain
//! - [`ChainId`]: `(publisher_id, msg_chain_id)`, the unit of ordering
//! - [`MessageId`]: full position of a message inside a stream partition

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// ADDRESS
// =============================================================================

/// A 20-byte Ethereum-style address.
///
/// Rendered and parsed as lowercase `0x`-prefixed hex. Parsing accepts any
/// letter case and an optional `0x` prefix.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(pub [u8; 20]);

/// Error returned when an address string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid address: {0}")]
pub struct AddressParseError(pub String);

impl Address {
    /// Creates an address from raw bytes.
    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Raw address bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        let bytes = hex::decode(digits).map_err(|_| AddressParseError(s.to_string()))?;
        let bytes: [u8; 20] = bytes
            .try_into()
            .map_err(|_| AddressParseError(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for Address {
    type Error = AddressParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

// =============================================================================
// MESSAGE REFERENCE
// =============================================================================

/// Position of a message inside its chain.
///
/// Totally ordered: timestamp is the major key, sequence number the minor key.
/// The derived `Ord` relies on the field declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageRef {
    /// Publisher-side creation time in milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Disambiguates messages published within the same millisecond.
    pub sequence_number: u64,
}

impl MessageRef {
    /// Creates a new message reference.
    pub const fn new(timestamp: i64, sequence_number: u64) -> Self {
        Self {
            timestamp,
            sequence_number,
        }
    }

    /// The reference directly following this one within the same timestamp.
    ///
    /// Used as the lower bound of a resend request after the last delivered
    /// message.
    pub fn next_in_sequence(&self) -> Self {
        Self::new(self.timestamp, self.sequence_number.saturating_add(1))
    }
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.timestamp, self.sequence_number)
    }
}

// =============================================================================
// CHAIN AND MESSAGE IDENTIFIERS
// =============================================================================

/// Identifies one logical chain: the messages of one publisher under one
/// message-chain id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChainId {
    pub publisher_id: Address,
    pub msg_chain_id: String,
}

impl ChainId {
    pub fn new(publisher_id: Address, msg_chain_id: impl Into<String>) -> Self {
        Self {
            publisher_id,
            msg_chain_id: msg_chain_id.into(),
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.publisher_id, self.msg_chain_id)
    }
}

/// Full identifier of a stream message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId {
    /// Stream the message was published to.
    pub stream_id: String,
    /// Partition of the stream.
    pub partition: u32,
    /// Position within the publisher's chain.
    pub message_ref: MessageRef,
    /// Address of the publisher.
    pub publisher_id: Address,
    /// Chain id chosen by the publisher (one publisher may run several chains).
    pub msg_chain_id: String,
}

impl MessageId {
    pub fn new(
        stream_id: impl Into<String>,
        partition: u32,
        message_ref: MessageRef,
        publisher_id: Address,
        msg_chain_id: impl Into<String>,
    ) -> Self {
        Self {
            stream_id: stream_id.into(),
            partition,
            message_ref,
            publisher_id,
            msg_chain_id: msg_chain_id.into(),
        }
    }

    /// The chain this message belongs to.
    pub fn chain_id(&self) -> ChainId {
        ChainId::new(self.publisher_id, self.msg_chain_id.clone())
    }
}
