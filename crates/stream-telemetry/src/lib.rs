//! # Stream Telemetry
//!
//! Logging and metrics shared by the stream client crates.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stream_telemetry::{init_logging, register_metrics, TelemetryConfig};
//!
//! let config = TelemetryConfig::from_env();
//! let _ = init_logging(&config);
//! let _ = register_metrics();
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SC_SERVICE_NAME` | `stream-client` | Service name in logs |
//! | `SC_LOG_LEVEL` / `RUST_LOG` | `info` | Log filter |
//! | `SC_JSON_LOGS` | `false` | JSON log lines |

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::init_logging;
pub use metrics::{
    gather_metrics, register_metrics, ACTIVE_SUBSCRIPTIONS, DECRYPTION_FAILURES,
    DUPLICATES_DROPPED, GAP_FILL_REQUESTS, GROUP_KEYS_STORED, KEY_REQUESTS, MESSAGES_DELIVERED,
    QUEUE_OVERFLOWS, REKEYS, UNRECOVERABLE_GAPS,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("A global tracing subscriber is already installed")]
    AlreadyInitialized,

    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),

    #[error("Prometheus metrics error: {0}")]
    Metrics(String),
}
