//! # Delayed Checker
//!
//! Per-branch timeout watchdog. If normal completion signaling never
//! arrives, the watchdog asks the group's authoritative node for the
//! outcome and clears the branch itself; if even the ask fails, it falls
//! back to a conservative rollback clean and leaves a diagnostic record.
//!
//! The registry of scheduled tasks is owned by the coordinator instance,
//! constructed at startup and drained at shutdown.

use crate::clearance::ClearancePipeline;
use crate::config::TxConfig;
use crate::context::GroupContextStore;
use crate::domain::{
    GroupId, RegistrarCode, TransactionOutcome, TransactionType, TxError, TxExceptionRecord,
    UnitId,
};
use crate::ports::outbound::MessageBus;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type TaskKey = (GroupId, UnitId);

/// Cancellable watchdog registry.
pub struct DelayedChecker {
    config: TxConfig,
    contexts: Arc<GroupContextStore>,
    bus: Arc<dyn MessageBus>,
    pipeline: Arc<ClearancePipeline>,
    tasks: Arc<Mutex<HashMap<TaskKey, JoinHandle<()>>>>,
}

impl DelayedChecker {
    /// Wire the checker against the node's context store, bus, and
    /// clearance pipeline.
    pub fn new(
        config: TxConfig,
        contexts: Arc<GroupContextStore>,
        bus: Arc<dyn MessageBus>,
        pipeline: Arc<ClearancePipeline>,
    ) -> Self {
        Self {
            config,
            contexts,
            bus,
            pipeline,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Schedule the watchdog for a branch at `now + tx_timeout`. A second
    /// call for the same branch keeps the existing task.
    pub fn start_delay_checking(&self, group: &GroupId, unit: &UnitId, tx_type: TransactionType) {
        let key = (group.clone(), unit.clone());
        let mut tasks = self.tasks.lock();
        if tasks.contains_key(&key) {
            debug!(group = %group, unit = %unit, "watchdog already scheduled");
            return;
        }

        let handle = tokio::spawn(watchdog(
            self.config.clone(),
            Arc::clone(&self.contexts),
            Arc::clone(&self.bus),
            Arc::clone(&self.pipeline),
            Arc::clone(&self.tasks),
            group.clone(),
            unit.clone(),
            tx_type,
        ));
        tasks.insert(key, handle);
        debug!(group = %group, unit = %unit, "watchdog scheduled");
    }

    /// Cancel a branch's watchdog. Safe whether the task is still
    /// pending, already running, or already finished; the normal
    /// completion path calls this as soon as the local outcome is known.
    pub fn stop_delay_checking(&self, group: &GroupId, unit: &UnitId) {
        if let Some(handle) = self.tasks.lock().remove(&(group.clone(), unit.clone())) {
            handle.abort();
            debug!(group = %group, unit = %unit, "watchdog cancelled");
        }
    }

    /// Number of watchdogs currently registered.
    pub fn pending(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Grant pending watchdogs a bounded grace period, then abandon the
    /// rest. Abandoned tasks are aborted, never forcibly run.
    pub async fn shutdown(&self) {
        let handles: Vec<(TaskKey, JoinHandle<()>)> = self.tasks.lock().drain().collect();
        if handles.is_empty() {
            return;
        }
        let deadline = tokio::time::Instant::now() + self.config.shutdown_grace;
        for ((group, unit), handle) in handles {
            let abort = handle.abort_handle();
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(_) => {}
                Err(_) => {
                    abort.abort();
                    warn!(group = %group, unit = %unit, "watchdog abandoned at shutdown");
                }
            }
        }
    }
}

/// Watchdog body for one branch.
#[allow(clippy::too_many_arguments)]
async fn watchdog(
    config: TxConfig,
    contexts: Arc<GroupContextStore>,
    bus: Arc<dyn MessageBus>,
    pipeline: Arc<ClearancePipeline>,
    tasks: Arc<Mutex<HashMap<TaskKey, JoinHandle<()>>>>,
    group: GroupId,
    unit: UnitId,
    tx_type: TransactionType,
) {
    tokio::time::sleep(config.tx_timeout).await;

    let Some(context) = contexts.get(&group) else {
        debug!(group = %group, unit = %unit, "context gone before watchdog fired");
        tasks.lock().remove(&(group, unit));
        return;
    };

    // Give still-running business code a bounded chance to finish.
    if !context.wait_complete(config.signal_wait).await {
        warn!(group = %group, unit = %unit, "business code did not signal before watchdog");
    }

    let asked = tokio::time::timeout(
        config.ask_timeout,
        bus.ask_transaction_state(&group, &unit),
    )
    .await
    .unwrap_or_else(|_| Err(TxError::Messaging("ask-state timed out".into())));

    match asked {
        Ok(outcome) => {
            warn!(group = %group, unit = %unit, %outcome, "watchdog resolving branch");
            let _ = pipeline
                .clear_branch(&group, &unit, tx_type, outcome, true)
                .await;
        }
        Err(err) => {
            // Ambiguous outcome: record the failure and clean
            // conservatively, keeping the aspect log for diagnosis.
            warn!(group = %group, unit = %unit, error = %err, "ask-state failed");
            pipeline
                .report(TxExceptionRecord::report(
                    group.clone(),
                    unit.clone(),
                    RegistrarCode::AskError,
                    TransactionOutcome::Rollback,
                ))
                .await;
            let _ = pipeline
                .clear_branch(&group, &unit, tx_type, TransactionOutcome::Rollback, false)
                .await;
        }
    }

    if let Some(context) = contexts.get(&group) {
        if context.all_cleared() {
            pipeline.retire_group(&group).await;
        }
    }
    tasks.lock().remove(&(group, unit));
}
