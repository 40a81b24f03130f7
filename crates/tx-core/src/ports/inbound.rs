//! # Inbound Ports
//!
//! Surfaces the core exposes to collaborators: remote command handling
//! wired into the messaging substrate, the SQL interception hooks, and
//! the bound confirm/cancel references for TCC.

use crate::domain::{
    AspectLog, GroupId, Row, StatementCapture, TransactionOutcome, TxContext, TxResult, UnitId,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// Remote commands a node answers over the messaging substrate. The
/// substrate delivers at-least-once, so every handler is idempotent.
#[async_trait]
pub trait RemoteCommandHandler: Send + Sync {
    /// A coordinator or checker announced the group outcome; clear the
    /// local branches of that group. A group unknown locally means the
    /// branches were already cleared and is not an error.
    async fn handle_notify_unit(
        &self,
        group: &GroupId,
        outcome: TransactionOutcome,
    ) -> TxResult<()>;

    /// Return the authoritative outcome of a group, if this node knows it.
    async fn handle_ask_state(
        &self,
        group: &GroupId,
        unit: &UnitId,
    ) -> TxResult<TransactionOutcome>;

    /// Return the stored aspect log for a branch.
    async fn handle_get_aspect_log(&self, group: &GroupId, unit: &UnitId) -> TxResult<AspectLog>;
}

/// Statement interception hooks, invoked by the SQL layer around every
/// statement executed while inside a group.
#[async_trait]
pub trait SqlInterception: Send + Sync {
    /// Called before a statement executes, with the parsed kind, table,
    /// and current row images for the rows it will touch.
    async fn before_statement(&self, ctx: &TxContext, capture: StatementCapture) -> TxResult<()>;

    /// Called after a statement executes, with any generated keys
    /// (meaningful for `INSERT`).
    async fn after_statement(
        &self,
        ctx: &TxContext,
        capture: StatementCapture,
        generated_keys: Vec<Row>,
    ) -> TxResult<()>;
}

/// Bound confirm/cancel references for a TCC branch. The Try phase is
/// the business method body; clearance later drives exactly one of
/// these with the compensation data the Try phase populated. Neither may
/// reuse the Try phase's connection or rely on its lock state.
#[async_trait]
pub trait TccExecutor: Send + Sync {
    /// Make the Try phase's reservation permanent.
    async fn confirm(&self, data: &HashMap<String, Value>) -> TxResult<()>;

    /// Release the Try phase's reservation.
    async fn cancel(&self, data: &HashMap<String, Value>) -> TxResult<()>;
}
