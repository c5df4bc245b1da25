//! Prometheus metrics for the stream client.
//!
//! All metrics follow the naming convention: `sc_<area>_<metric>[_total]`
//!
//! Counters are incremented by the subscription layer; the subsystem crates
//! only log.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

use crate::TelemetryError;

lazy_static! {
    /// Registry holding every stream client metric
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // ORDERING
    // =========================================================================

    /// Messages handed to the application
    pub static ref MESSAGES_DELIVERED: IntCounter = IntCounter::new(
        "sc_ordering_messages_delivered_total",
        "Messages delivered to the application in chain order"
    ).expect("metric creation failed");

    /// Duplicate or stale messages dropped
    pub static ref DUPLICATES_DROPPED: IntCounter = IntCounter::new(
        "sc_ordering_duplicates_dropped_total",
        "Messages dropped because they were already delivered"
    ).expect("metric creation failed");

    /// Resend requests sent for gaps
    pub static ref GAP_FILL_REQUESTS: IntCounter = IntCounter::new(
        "sc_ordering_gap_fill_requests_total",
        "Resend requests sent to fill chain gaps"
    ).expect("metric creation failed");

    /// Gaps still open after the last resend request
    pub static ref UNRECOVERABLE_GAPS: IntCounter = IntCounter::new(
        "sc_ordering_unrecoverable_gaps_total",
        "Gaps that stayed open after the maximum number of resend requests"
    ).expect("metric creation failed");

    /// Out-of-order queues that hit their capacity
    pub static ref QUEUE_OVERFLOWS: IntCounter = IntCounter::new(
        "sc_ordering_queue_overflows_total",
        "Out-of-order messages rejected by a full chain queue"
    ).expect("metric creation failed");

    // =========================================================================
    // DECRYPTION AND KEY EXCHANGE
    // =========================================================================

    /// Group key requests sent
    pub static ref KEY_REQUESTS: IntCounter = IntCounter::new(
        "sc_keys_requests_total",
        "Group key requests sent to publishers"
    ).expect("metric creation failed");

    /// Messages that could not be decrypted
    pub static ref DECRYPTION_FAILURES: IntCounter = IntCounter::new(
        "sc_keys_decryption_failures_total",
        "Messages reported as undecryptable to the application"
    ).expect("metric creation failed");

    /// Group keys received from publishers
    pub static ref GROUP_KEYS_STORED: IntCounter = IntCounter::new(
        "sc_keys_group_keys_received_total",
        "Group keys received through responses, announces and attached next keys"
    ).expect("metric creation failed");

    /// Rekeys performed by the local publisher
    pub static ref REKEYS: IntCounter = IntCounter::new(
        "sc_keys_rekeys_total",
        "Group key replacements announced by the local publisher"
    ).expect("metric creation failed");

    // =========================================================================
    // SUBSCRIPTIONS
    // =========================================================================

    /// Subscriptions not yet unsubscribed
    pub static ref ACTIVE_SUBSCRIPTIONS: IntGauge = IntGauge::new(
        "sc_subscriptions_active",
        "Subscriptions that have not been unsubscribed"
    ).expect("metric creation failed");
}

/// Register all metrics with [`REGISTRY`].
///
/// # Errors
///
/// `TelemetryError::Metrics` if called more than once.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Ordering
        Box::new(MESSAGES_DELIVERED.clone()),
        Box::new(DUPLICATES_DROPPED.clone()),
        Box::new(GAP_FILL_REQUESTS.clone()),
        Box::new(UNRECOVERABLE_GAPS.clone()),
        Box::new(QUEUE_OVERFLOWS.clone()),
        // Keys
        Box::new(KEY_REQUESTS.clone()),
        Box::new(DECRYPTION_FAILURES.clone()),
        Box::new(GROUP_KEYS_STORED.clone()),
        Box::new(REKEYS.clone()),
        // Subscriptions
        Box::new(ACTIVE_SUBSCRIPTIONS.clone()),
    ];

    for metric in metrics {
        REGISTRY
            .register(metric)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
    }
    Ok(())
}

/// Encode all registered metrics in the Prometheus text format.
pub fn gather_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_after_register() {
        // Registering twice fails; either outcome leaves the metrics registered.
        let _ = register_metrics();
        REKEYS.inc();

        let text = gather_metrics().unwrap();
        assert!(text.contains("sc_keys_rekeys_total"));
        assert!(register_metrics().is_err());
    }

    #[test]
    fn test_gauge_set() {
        ACTIVE_SUBSCRIPTIONS.set(3);
        assert_eq!(ACTIVE_SUBSCRIPTIONS.get(), 3);
    }
}
