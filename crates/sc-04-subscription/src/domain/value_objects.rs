//! Identifiers, delivery modes and client configuration.

use std::fmt;
use std::time::Duration;

use sc_01_message_ordering::{GapFillFailurePolicy, OrderingConfig, QueueOverflowPolicy};
use sc_02_decryption::DecryptionConfig;
use sc_03_key_exchange::KeyExchangeConfig;
use serde::{Deserialize, Serialize};
use shared_types::{Address, MessageRef};

use super::ControlMessage;

// =============================================================================
// IDENTIFIERS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Correlates resent messages with the resend request they answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

// =============================================================================
// DELIVERY MODES
// =============================================================================

/// Which stored messages a historical subscription asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResendSpec {
    Last {
        count: u64,
    },
    From {
        from: MessageRef,
        publisher_id: Option<Address>,
    },
    Range {
        from: MessageRef,
        to: MessageRef,
        publisher_id: Option<Address>,
        msg_chain_id: Option<String>,
    },
}

impl ResendSpec {
    pub fn to_control(&self, request_id: RequestId, stream_id: &str, partition: u32) -> ControlMessage {
        let stream_id = stream_id.to_string();
        match self.clone() {
            ResendSpec::Last { count } => ControlMessage::ResendLast {
                request_id,
                stream_id,
                partition,
                count,
            },
            ResendSpec::From { from, publisher_id } => ControlMessage::ResendFrom {
                request_id,
                stream_id,
                partition,
                from,
                publisher_id,
            },
            ResendSpec::Range {
                from,
                to,
                publisher_id,
                msg_chain_id,
            } => ControlMessage::ResendRange {
                request_id,
                stream_id,
                partition,
                from,
                to,
                publisher_id,
                msg_chain_id,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Messages published from now on.
    RealTime,
    /// Stored messages only; the subscription completes once they are delivered.
    Historical(ResendSpec),
    /// Stored messages first, then real-time without gap or duplicate.
    Combined(ResendSpec),
}

impl DeliveryMode {
    /// The initial resend request, if the mode has one.
    pub fn resend(&self) -> Option<&ResendSpec> {
        match self {
            DeliveryMode::RealTime => None,
            DeliveryMode::Historical(spec) | DeliveryMode::Combined(spec) => Some(spec),
        }
    }

    /// Whether the mode subscribes to real-time messages.
    pub fn is_real_time(&self) -> bool {
        !matches!(self, DeliveryMode::Historical(_))
    }
}

// =============================================================================
// CLIENT CONFIGURATION
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub ordering: OrderingConfig,
    pub decryption: DecryptionConfig,
    pub key_exchange: KeyExchangeConfig,
    /// Unsubscribe after a fatal ordering error instead of continuing degraded.
    pub teardown_on_fatal: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ordering: OrderingConfig::default(),
            decryption: DecryptionConfig::default(),
            key_exchange: KeyExchangeConfig::default(),
            teardown_on_fatal: true,
        }
    }
}

impl ClientConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SC_PROPAGATION_TIMEOUT_MS`: Delay before the first resend request (default: 5000)
    /// - `SC_RESEND_TIMEOUT_MS`: Delay between resend requests (default: 5000)
    /// - `SC_MAX_GAP_REQUESTS`: Resend requests per gap (default: 10)
    /// - `SC_MAX_QUEUE_SIZE`: Out-of-order queue capacity per chain (default: 10000)
    /// - `SC_SKIP_GAPS`: Skip unrecoverable gaps and reset full queues (default: false)
    /// - `SC_KEY_REQUEST_INTERVAL_MS`: Delay between key requests (default: 5000)
    /// - `SC_MAX_KEY_REQUESTS`: Key requests per key id (default: 5)
    ///
    /// Unparsable values fall back to the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`ClientConfig::from_env`] with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let millis = |name: &str, default: Duration| {
            lookup(name)
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(default)
        };
        let skip_gaps = lookup("SC_SKIP_GAPS")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(false);

        let ordering = OrderingConfig {
            propagation_timeout: millis("SC_PROPAGATION_TIMEOUT_MS", defaults.ordering.propagation_timeout),
            resend_timeout: millis("SC_RESEND_TIMEOUT_MS", defaults.ordering.resend_timeout),
            max_gap_requests: lookup("SC_MAX_GAP_REQUESTS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.ordering.max_gap_requests),
            max_queue_size: lookup("SC_MAX_QUEUE_SIZE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.ordering.max_queue_size),
            gap_fill_failure: if skip_gaps {
                GapFillFailurePolicy::Skip
            } else {
                GapFillFailurePolicy::Fatal
            },
            queue_overflow: if skip_gaps {
                QueueOverflowPolicy::Reset
            } else {
                QueueOverflowPolicy::Strict
            },
        };

        let decryption = DecryptionConfig {
            key_request_interval: millis("SC_KEY_REQUEST_INTERVAL_MS", defaults.decryption.key_request_interval),
            max_key_requests: lookup("SC_MAX_KEY_REQUESTS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.decryption.max_key_requests),
        };

        Self {
            ordering,
            decryption,
            ..defaults
        }
    }
}
