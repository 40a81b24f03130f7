//! # TCC Strategy
//!
//! Try/confirm/cancel style. The business method body is the Try phase
//! and populates a shared compensation-data map; clearance later drives
//! the bound confirm (commit) or cancel (rollback) reference with that
//! map, on a fresh execution that never reuses the Try phase's
//! connection or lock state.

use super::TransactionStrategy;
use crate::context::GroupContextStore;
use crate::domain::{
    GroupId, TransactionOutcome, TransactionType, TxContext, TxError, TxResult, UnitId,
};
use crate::ports::inbound::TccExecutor;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

fn attachment_key(unit: &UnitId) -> String {
    format!("tcc:{unit}")
}

/// A branch's bound confirm/cancel references plus the compensation-data
/// map the Try phase mutates.
pub struct TccBinding {
    /// Compensation data, populated by the Try phase, handed to confirm
    /// or cancel.
    pub data: Mutex<HashMap<String, Value>>,
    /// The bound confirm/cancel implementation.
    pub executor: Arc<dyn TccExecutor>,
}

impl TccBinding {
    /// Record one compensation-data entry during the Try phase.
    pub fn put(&self, key: &str, value: Value) {
        self.data.lock().insert(key.to_string(), value);
    }
}

/// Try/confirm/cancel protocol implementation.
pub struct TccStrategy {
    contexts: Arc<GroupContextStore>,
    /// Branches whose confirm/cancel already ran. The messaging substrate
    /// is at-least-once, so a duplicate delivery must not re-run them.
    invoked: Mutex<HashSet<(GroupId, UnitId)>>,
}

impl TccStrategy {
    /// Build against the node's context store.
    pub fn new(contexts: Arc<GroupContextStore>) -> Self {
        Self {
            contexts,
            invoked: Mutex::new(HashSet::new()),
        }
    }

    /// Bind confirm/cancel references for a branch at the start of its
    /// Try phase. Returns the binding so business code can populate the
    /// compensation-data map.
    pub fn bind(&self, ctx: &TxContext, executor: Arc<dyn TccExecutor>) -> TxResult<Arc<TccBinding>> {
        let context = self
            .contexts
            .get(&ctx.group_id)
            .ok_or_else(|| TxError::GroupNotFound(ctx.group_id.clone()))?;
        let binding = context.attach_if_absent(
            &attachment_key(&ctx.unit_id),
            Arc::new(TccBinding {
                data: Mutex::new(HashMap::new()),
                executor,
            }),
        );
        debug!(group = %ctx.group_id, unit = %ctx.unit_id, "tcc binding registered");
        Ok(binding)
    }

    /// The binding for a branch, if registered.
    pub fn binding(&self, group: &GroupId, unit: &UnitId) -> Option<Arc<TccBinding>> {
        self.contexts
            .get(group)
            .and_then(|context| context.lookup::<TccBinding>(&attachment_key(unit)))
    }
}

#[async_trait]
impl TransactionStrategy for TccStrategy {
    fn transaction_type(&self) -> TransactionType {
        TransactionType::Tcc
    }

    async fn on_business_start(&self, ctx: &TxContext) -> TxResult<()> {
        debug!(group = %ctx.group_id, unit = %ctx.unit_id, state = ?ctx.state, "tcc try begins");
        Ok(())
    }

    async fn on_business_success(&self, ctx: &TxContext) -> TxResult<()> {
        debug!(group = %ctx.group_id, unit = %ctx.unit_id, "tcc try succeeded");
        Ok(())
    }

    async fn on_business_error(&self, ctx: &TxContext) -> TxResult<()> {
        debug!(group = %ctx.group_id, unit = %ctx.unit_id, "tcc try failed");
        Ok(())
    }

    async fn clear(
        &self,
        group: &GroupId,
        unit: &UnitId,
        outcome: TransactionOutcome,
    ) -> TxResult<()> {
        if !self.invoked.lock().insert((group.clone(), unit.clone())) {
            debug!(group = %group, unit = %unit, %outcome, "duplicate tcc clearance suppressed");
            return Ok(());
        }

        let Some(binding) = self.binding(group, unit) else {
            warn!(group = %group, unit = %unit, "no tcc binding at clearance");
            return Err(TxError::ResourceNotFound {
                group: group.clone(),
                key: attachment_key(unit),
            });
        };

        // Snapshot the map; confirm/cancel may run long after the Try
        // phase's transaction closed.
        let data = binding.data.lock().clone();
        match outcome {
            TransactionOutcome::Commit => binding.executor.confirm(&data).await?,
            TransactionOutcome::Rollback => binding.executor.cancel(&data).await?,
        }
        debug!(group = %group, unit = %unit, %outcome, "tcc clearance done");
        Ok(())
    }

    async fn on_group_retired(&self, group: &GroupId) {
        // Without the context, duplicate deliveries cannot reach `clear`.
        self.invoked.lock().retain(|(g, _)| g != group);
    }
}
