//! # Clearance Pipeline
//!
//! Drives a strategy's clearance routine for one branch, exactly once
//! per branch, and turns unrecoverable clearance errors into diagnostic
//! records instead of crashing the node.

use crate::context::GroupContextStore;
use crate::domain::{
    AspectLog, GroupId, RegistrarCode, TransactionOutcome, TransactionType, TxError,
    TxExceptionRecord, TxResult, UnitId,
};
use crate::ports::outbound::{AspectLogStore, TxExceptionStore};
use crate::strategy::StrategyRegistry;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Clearance driver shared by the normal completion path, the inbound
/// notify handler, and the delayed checker.
pub struct ClearancePipeline {
    contexts: Arc<GroupContextStore>,
    registry: Arc<StrategyRegistry>,
    aspect_logs: Arc<dyn AspectLogStore>,
    exceptions: Arc<dyn TxExceptionStore>,
}

impl ClearancePipeline {
    /// Wire the pipeline against the node's stores and strategy table.
    pub fn new(
        contexts: Arc<GroupContextStore>,
        registry: Arc<StrategyRegistry>,
        aspect_logs: Arc<dyn AspectLogStore>,
        exceptions: Arc<dyn TxExceptionStore>,
    ) -> Self {
        Self {
            contexts,
            registry,
            aspect_logs,
            exceptions,
        }
    }

    /// Clear one branch. Idempotent per branch: whichever of the normal
    /// path, the notify handler, or the watchdog gets here first runs the
    /// strategy routine; later arrivals are no-ops.
    ///
    /// With `finalize_aspect_log` set, a successful clear also removes
    /// the branch's aspect log. The checker's ambiguous-outcome fallback
    /// clears without finalizing, so the log survives for diagnosis.
    ///
    /// A failing clearance routine is reported as a diagnostic record
    /// and logged; the branch is left for operator inspection and the
    /// error is not propagated.
    pub async fn clear_branch(
        &self,
        group: &GroupId,
        unit: &UnitId,
        tx_type: TransactionType,
        outcome: TransactionOutcome,
        finalize_aspect_log: bool,
    ) -> TxResult<()> {
        if let Some(context) = self.contexts.get(group) {
            if !context.mark_cleared(unit) {
                debug!(group = %group, unit = %unit, "branch already cleared");
                return Ok(());
            }
        }

        let strategy = self.registry.get(tx_type)?;
        match strategy.clear(group, unit, outcome).await {
            Ok(()) => {
                if finalize_aspect_log {
                    self.aspect_logs.remove(group, unit).await?;
                }
                debug!(group = %group, unit = %unit, %outcome, "branch cleared");
                Ok(())
            }
            Err(err) => {
                let failure = TxError::ClearanceFailure {
                    group: group.clone(),
                    unit: unit.clone(),
                    detail: err.to_string(),
                };
                error!(%outcome, error = %failure, "clearance failed, branch left for inspection");
                self.report(TxExceptionRecord::report(
                    group.clone(),
                    unit.clone(),
                    RegistrarCode::ClearFailed,
                    outcome,
                ))
                .await;
                Ok(())
            }
        }
    }

    /// Retire a group's context and let every strategy drop the
    /// per-branch bookkeeping it still holds for the group. Once the
    /// context is gone, no clearance path can reach the group again, so
    /// the bookkeeping has nothing left to guard.
    pub async fn retire_group(&self, group: &GroupId) {
        if self.contexts.remove(group).is_none() {
            return;
        }
        for strategy in self.registry.all() {
            strategy.on_group_retired(group).await;
        }
        debug!(group = %group, "group retired");
    }

    /// Stored aspect log for a branch, or a typed not-found.
    pub async fn fetch_aspect_log(&self, group: &GroupId, unit: &UnitId) -> TxResult<AspectLog> {
        self.aspect_logs
            .get(group, unit)
            .await?
            .ok_or_else(|| TxError::AspectLogNotFound {
                group: group.clone(),
                unit: unit.clone(),
            })
    }

    /// Append a diagnostic record; a failing diagnostic store is itself
    /// only logged.
    pub async fn report(&self, record: TxExceptionRecord) {
        if let Err(err) = self.exceptions.report(record).await {
            warn!(error = %err, "failed to record transaction exception");
        }
    }
}
