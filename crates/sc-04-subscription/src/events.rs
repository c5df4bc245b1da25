//! Error types for the Subscription subsystem.

use sc_01_message_ordering::OrderingError;
use sc_03_key_exchange::KeyExchangeError;
use shared_crypto::CryptoError;
use thiserror::Error;

use crate::domain::{LifecycleEvent, SubscriptionId, SubscriptionState};

/// Subscription errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    #[error("Subscription {subscription} cannot handle {event:?} while {state}")]
    InvalidState {
        subscription: SubscriptionId,
        state: SubscriptionState,
        event: LifecycleEvent,
    },

    #[error("Unknown subscription {0}")]
    UnknownSubscription(SubscriptionId),

    #[error(transparent)]
    Ordering(#[from] OrderingError),

    #[error(transparent)]
    KeyExchange(#[from] KeyExchangeError),

    #[error("Transport failure: {0}")]
    Transport(String),
}

impl From<CryptoError> for SubscriptionError {
    fn from(e: CryptoError) -> Self {
        SubscriptionError::KeyExchange(KeyExchangeError::Crypto(e))
    }
}

impl SubscriptionError {
    /// Whether the error stops a chain for good.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SubscriptionError::Ordering(_))
    }
}
