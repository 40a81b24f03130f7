//! # LCN Strategy
//!
//! Held-resource style: the branch keeps one auto-commit-disabled
//! connection per `(group, datasource)` open until the group outcome is
//! known, then commits or rolls it back and releases it to the pool.

use super::TransactionStrategy;
use crate::context::GroupContextStore;
use crate::domain::{
    GroupId, PropagationState, TransactionOutcome, TransactionType, TxContext, TxResult, UnitId,
};
use crate::ports::outbound::{DataSourcePool, TxConnection};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Attachment key prefix for held resources in the group context.
const ATTACHMENT_PREFIX: &str = "lcn:";

fn attachment_key(datasource: &str) -> String {
    format!("{ATTACHMENT_PREFIX}{datasource}")
}

/// A connection kept open and uncommitted for the duration of a group,
/// owned by the group context's attachment map. Released (committed or
/// rolled back) exactly once by clearance.
pub struct HeldResource {
    /// Datasource the connection belongs to.
    pub datasource: String,
    /// The auto-commit-disabled connection.
    pub connection: Arc<dyn TxConnection>,
}

/// Held-resource protocol implementation.
pub struct LcnStrategy {
    contexts: Arc<GroupContextStore>,
    pool: Arc<dyn DataSourcePool>,
}

impl LcnStrategy {
    /// Build against the node's context store and connection pool.
    pub fn new(contexts: Arc<GroupContextStore>, pool: Arc<dyn DataSourcePool>) -> Self {
        Self { contexts, pool }
    }

    /// Acquire the held resource for `(group, datasource)`, creating and
    /// registering one with auto-commit disabled on first use. A second
    /// acquisition for the same pair returns the stored resource.
    pub async fn acquire(&self, ctx: &TxContext, datasource: &str) -> TxResult<Arc<HeldResource>> {
        let context = self
            .contexts
            .get(&ctx.group_id)
            .ok_or_else(|| crate::domain::TxError::GroupNotFound(ctx.group_id.clone()))?;

        let key = attachment_key(datasource);
        if let Some(held) = context.lookup::<HeldResource>(&key) {
            debug!(group = %ctx.group_id, datasource, "reusing held resource");
            return Ok(held);
        }

        let connection = self.pool.connection(datasource, false).await?;
        let held = context.attach_if_absent(
            &key,
            Arc::new(HeldResource {
                datasource: datasource.to_string(),
                connection,
            }),
        );
        debug!(group = %ctx.group_id, datasource, "held resource registered");
        Ok(held)
    }

    /// Whether this unit may drive the success/error hooks. Reentrant
    /// units of the same type on the same node are no-ops, preventing
    /// double-clearance when transactional methods call each other.
    fn drives_hooks(&self, ctx: &TxContext) -> bool {
        match self.contexts.get(&ctx.group_id) {
            Some(context) => context.is_primary_unit(TransactionType::Lcn, &ctx.unit_id),
            None => false,
        }
    }
}

#[async_trait]
impl TransactionStrategy for LcnStrategy {
    fn transaction_type(&self) -> TransactionType {
        TransactionType::Lcn
    }

    async fn on_business_start(&self, ctx: &TxContext) -> TxResult<()> {
        debug!(group = %ctx.group_id, unit = %ctx.unit_id, state = ?ctx.state, "lcn start");
        Ok(())
    }

    async fn on_business_success(&self, ctx: &TxContext) -> TxResult<()> {
        if !self.drives_hooks(ctx) {
            debug!(group = %ctx.group_id, unit = %ctx.unit_id, "reentrant lcn unit, success no-op");
            return Ok(());
        }
        // Commit is deferred until the group outcome is known.
        debug!(group = %ctx.group_id, unit = %ctx.unit_id, "lcn business success");
        Ok(())
    }

    async fn on_business_error(&self, ctx: &TxContext) -> TxResult<()> {
        if !self.drives_hooks(ctx) {
            debug!(group = %ctx.group_id, unit = %ctx.unit_id, "reentrant lcn unit, error no-op");
            return Ok(());
        }
        // Local failure: roll the held resources back immediately rather
        // than waiting out the group.
        self.clear(&ctx.group_id, &ctx.unit_id, TransactionOutcome::Rollback)
            .await
    }

    async fn clear(
        &self,
        group: &GroupId,
        unit: &UnitId,
        outcome: TransactionOutcome,
    ) -> TxResult<()> {
        let Some(context) = self.contexts.get(group) else {
            debug!(group = %group, unit = %unit, "no context at lcn clear");
            return Ok(());
        };

        let drained = context.drain_attachments(ATTACHMENT_PREFIX);
        if drained.is_empty() {
            // Not an error: the branch may not have touched a database,
            // or an earlier clear already released the resources.
            info!(group = %group, unit = %unit, %outcome, "no held resource to clear");
            return Ok(());
        }

        for (key, any) in drained {
            let Ok(held) = any.downcast::<HeldResource>() else {
                continue;
            };
            match outcome {
                TransactionOutcome::Commit => held.connection.commit().await?,
                TransactionOutcome::Rollback => held.connection.rollback().await?,
            }
            debug!(group = %group, attachment = %key, %outcome, "held resource released");
        }
        Ok(())
    }
}
