//! Coordinator configuration.

use std::time::Duration;

/// Tunables for the coordination core. Every wait in the crate is bounded
/// by one of these; an unbounded wait is a correctness hazard because a
/// stuck business task would block recovery forever.
#[derive(Clone, Debug)]
pub struct TxConfig {
    /// Delay before a branch's watchdog fires and asks for the
    /// authoritative group outcome.
    pub tx_timeout: Duration,
    /// Upper bound on waiting for the local business code to signal
    /// completion (watchdog and inbound notify both use it).
    pub signal_wait: Duration,
    /// Upper bound on the ask-state round-trip over the messaging
    /// substrate.
    pub ask_timeout: Duration,
    /// Grace period granted to pending watchdogs at shutdown; tasks not
    /// finished in time are abandoned, not forcibly run.
    pub shutdown_grace: Duration,
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            tx_timeout: Duration::from_secs(30),
            signal_wait: Duration::from_secs(5),
            ask_timeout: Duration::from_secs(3),
            shutdown_grace: Duration::from_secs(3),
        }
    }
}
