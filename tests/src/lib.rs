//! # Stream-Client Test Suite
//!
//! End-to-end flows: real clients publishing and subscribing through an
//! in-memory broker that delivers asynchronously, like a network would.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── harness.rs       # Broker, broker-backed transport, test clients
//!     ├── flows.rs         # Ordering, gap repair, delivery modes
//!     └── key_rotation.rs  # Key exchange, rotation, rekey with revocation
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p sc-tests
//! cargo test -p sc-tests integration::key_rotation::
//! ```

pub mod integration;
