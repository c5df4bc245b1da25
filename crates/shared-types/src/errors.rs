//! # Error Types
//!
//! Errors shared across subsystems.

use thiserror::Error;

/// Reasons a message is rejected by validation before it reaches the
/// ordering and decryption pipeline.
///
/// The set is closed: every rejection maps to exactly one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The message breaks a stream-level policy.
    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    /// Sender or recipient lacks the publish/subscribe permission required.
    #[error("Permission violation: {0}")]
    PermissionViolation(String),

    /// The signature does not match the claimed publisher.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// The message or its content is malformed.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// The message must be signed but is not.
    #[error("Unsigned message not allowed: {0}")]
    UnsignedNotAllowed(String),
}
