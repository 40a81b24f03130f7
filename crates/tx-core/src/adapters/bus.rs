//! In-memory messaging substrate.
//!
//! Wires the registered nodes' command handlers together for tests and
//! single-process operation. Models the substrate's contract honestly:
//! delivery is best-effort per node with no retries here (the delayed
//! checker is the recovery path), asks are answered by whichever node
//! knows the outcome, and faults can be injected per operation.

use crate::domain::{AspectLog, GroupId, TransactionOutcome, TxError, TxResult, UnitId};
use crate::ports::inbound::RemoteCommandHandler;
use crate::ports::outbound::MessageBus;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// In-memory bus connecting every registered node.
#[derive(Default)]
pub struct InMemoryMessageBus {
    nodes: RwLock<Vec<(String, Arc<dyn RemoteCommandHandler>)>>,
    fail_asks: AtomicBool,
    notify_count: AtomicU64,
    ask_count: AtomicU64,
}

impl InMemoryMessageBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node's command handler.
    pub fn register(&self, node_id: &str, handler: Arc<dyn RemoteCommandHandler>) {
        self.nodes.write().push((node_id.to_string(), handler));
    }

    /// Make every subsequent ask-state round-trip fail at the transport
    /// level (exercises the checker's ambiguous-outcome path).
    pub fn fail_asks(&self, fail: bool) {
        self.fail_asks.store(fail, Ordering::SeqCst);
    }

    /// Number of group notifications sent.
    pub fn notify_count(&self) -> u64 {
        self.notify_count.load(Ordering::SeqCst)
    }

    /// Number of ask-state round-trips attempted.
    pub fn ask_count(&self) -> u64 {
        self.ask_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn notify_group(&self, group: &GroupId, outcome: TransactionOutcome) -> TxResult<()> {
        self.notify_count.fetch_add(1, Ordering::SeqCst);
        let nodes = self.nodes.read().clone();
        for (node_id, handler) in nodes {
            match handler.handle_notify_unit(group, outcome).await {
                Ok(()) => debug!(group = %group, node = %node_id, %outcome, "unit notified"),
                Err(err) => {
                    // Best effort; the remote checker reconciles later.
                    warn!(group = %group, node = %node_id, error = %err, "notify failed");
                }
            }
        }
        Ok(())
    }

    async fn ask_transaction_state(
        &self,
        group: &GroupId,
        unit: &UnitId,
    ) -> TxResult<TransactionOutcome> {
        self.ask_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_asks.load(Ordering::SeqCst) {
            return Err(TxError::Messaging("ask-state transport failure".into()));
        }
        let nodes = self.nodes.read().clone();
        for (node_id, handler) in nodes {
            match handler.handle_ask_state(group, unit).await {
                Ok(outcome) => {
                    debug!(group = %group, node = %node_id, %outcome, "state answered");
                    return Ok(outcome);
                }
                Err(_) => continue,
            }
        }
        Err(TxError::OutcomeUnknown(group.clone()))
    }

    async fn fetch_aspect_log(&self, group: &GroupId, unit: &UnitId) -> TxResult<AspectLog> {
        let nodes = self.nodes.read().clone();
        for (_, handler) in nodes {
            if let Ok(log) = handler.handle_get_aspect_log(group, unit).await {
                return Ok(log);
            }
        }
        Err(TxError::AspectLogNotFound {
            group: group.clone(),
            unit: unit.clone(),
        })
    }
}
