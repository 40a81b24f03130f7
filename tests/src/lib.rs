//! # tx-core Test Suite
//!
//! Unified test crate for cross-node coordination flows.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/      # Multi-node group lifecycle and recovery
//!     ├── flows.rs      # Starter/joiner commit and rollback flows
//!     └── recovery.rs   # Lost notifications, watchdog reconciliation
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p tx-tests
//!
//! # By category
//! cargo test -p tx-tests integration::
//! ```

#![allow(unused_imports)]
#![allow(dead_code)]


/// Install the fmt subscriber for the whole suite, filtered by
/// `RUST_LOG`. Later calls no-op, so every fixture requests it
/// unconditionally.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
