//! # TXC Strategy
//!
//! Automatic compensation. Every mutating statement executed in-group is
//! captured around execution and persisted as an undo-log entry; commit
//! clearance deletes the entries, rollback clearance replays their
//! inverses in reverse execution order against the original datasource.

use super::TransactionStrategy;
use crate::domain::{
    now_secs, GroupId, Row, RollbackPayload, StatementCapture, StatementKind, TransactionOutcome,
    TransactionType, TxContext, TxError, TxResult, UndoLogEntry, UnitId,
};
use crate::ports::outbound::{DataSourcePool, TxConnection, UndoLogStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Undo-log compensation protocol implementation.
pub struct TxcStrategy {
    undo: Arc<dyn UndoLogStore>,
    pool: Arc<dyn DataSourcePool>,
    /// Per-branch statement sequence; replay undoes entries in strictly
    /// descending sequence order.
    seqs: Mutex<HashMap<(GroupId, UnitId), u64>>,
}

impl TxcStrategy {
    /// Build against the node's undo-log store and connection pool.
    pub fn new(undo: Arc<dyn UndoLogStore>, pool: Arc<dyn DataSourcePool>) -> Self {
        Self {
            undo,
            pool,
            seqs: Mutex::new(HashMap::new()),
        }
    }

    fn next_seq(&self, group: &GroupId, unit: &UnitId) -> u64 {
        let mut seqs = self.seqs.lock();
        let seq = seqs.entry((group.clone(), unit.clone())).or_insert(0);
        *seq += 1;
        *seq
    }

    async fn append(
        &self,
        ctx: &TxContext,
        datasource: &str,
        kind: StatementKind,
        payload: RollbackPayload,
    ) -> TxResult<()> {
        let entry = UndoLogEntry {
            id: Uuid::new_v4().simple().to_string(),
            datasource: datasource.to_string(),
            unit_id: ctx.unit_id.clone(),
            group_id: ctx.group_id.clone(),
            kind,
            payload,
            created_at: now_secs(),
            seq: self.next_seq(&ctx.group_id, &ctx.unit_id),
        };
        debug!(
            group = %ctx.group_id,
            unit = %ctx.unit_id,
            seq = entry.seq,
            kind = ?kind,
            "undo entry recorded"
        );
        self.undo.append(entry).await
    }

    /// Before-execution hook. Captures the current row images for
    /// `UPDATE` and `DELETE`; `INSERT` capture is deferred to the
    /// after-execution hook, and `SELECT ... FOR UPDATE` is lock-bearing
    /// with no undo entry.
    pub async fn before_statement(&self, ctx: &TxContext, capture: StatementCapture) -> TxResult<()> {
        match capture.kind {
            StatementKind::Update => {
                self.append(
                    ctx,
                    &capture.datasource,
                    capture.kind,
                    RollbackPayload::RestoreRows {
                        table: capture.table,
                        key_columns: capture.key_columns,
                        rows: capture.before_rows,
                    },
                )
                .await
            }
            StatementKind::Delete => {
                self.append(
                    ctx,
                    &capture.datasource,
                    capture.kind,
                    RollbackPayload::ReinsertRows {
                        table: capture.table,
                        rows: capture.before_rows,
                    },
                )
                .await
            }
            StatementKind::Insert => {
                debug!(table = %capture.table, "insert capture deferred until keys are generated");
                Ok(())
            }
            StatementKind::SelectForUpdate => {
                debug!(table = %capture.table, "lock-bearing select, no undo entry");
                Ok(())
            }
        }
    }

    /// After-execution hook. Records the generated keys of an `INSERT`
    /// so rollback can delete the inserted rows.
    pub async fn after_statement(
        &self,
        ctx: &TxContext,
        capture: StatementCapture,
        generated_keys: Vec<Row>,
    ) -> TxResult<()> {
        if capture.kind != StatementKind::Insert || generated_keys.is_empty() {
            return Ok(());
        }
        self.append(
            ctx,
            &capture.datasource,
            StatementKind::Insert,
            RollbackPayload::DeleteByKeys {
                table: capture.table,
                key_columns: capture.key_columns,
                keys: generated_keys,
            },
        )
        .await
    }
}

#[async_trait]
impl TransactionStrategy for TxcStrategy {
    fn transaction_type(&self) -> TransactionType {
        TransactionType::Txc
    }

    async fn on_business_start(&self, ctx: &TxContext) -> TxResult<()> {
        debug!(group = %ctx.group_id, unit = %ctx.unit_id, state = ?ctx.state, "txc start");
        Ok(())
    }

    async fn on_business_success(&self, ctx: &TxContext) -> TxResult<()> {
        debug!(group = %ctx.group_id, unit = %ctx.unit_id, "txc business success");
        Ok(())
    }

    async fn on_business_error(&self, ctx: &TxContext) -> TxResult<()> {
        debug!(group = %ctx.group_id, unit = %ctx.unit_id, "txc business error");
        Ok(())
    }

    async fn clear(
        &self,
        group: &GroupId,
        unit: &UnitId,
        outcome: TransactionOutcome,
    ) -> TxResult<()> {
        match outcome {
            TransactionOutcome::Commit => {
                let removed = self.undo.delete_all(group, unit).await?;
                self.seqs.lock().remove(&(group.clone(), unit.clone()));
                info!(group = %group, unit = %unit, removed, "undo entries discarded on commit");
                Ok(())
            }
            TransactionOutcome::Rollback => {
                let entries = self.undo.fetch(group, unit).await?;
                // Last applied, first undone: intermediate states restore
                // correctly only in reverse execution order.
                for entry in entries.iter().rev() {
                    let connection = self.pool.connection(&entry.datasource, true).await?;
                    for op in entry.payload.compensation_ops() {
                        connection.execute(&op).await.map_err(|err| TxError::UndoReplay {
                            group: group.clone(),
                            unit: unit.clone(),
                            detail: err.to_string(),
                        })?;
                    }
                    debug!(group = %group, unit = %unit, seq = entry.seq, "undo entry replayed");
                }
                let removed = self.undo.delete_all(group, unit).await?;
                self.seqs.lock().remove(&(group.clone(), unit.clone()));
                info!(group = %group, unit = %unit, removed, "branch compensated");
                Ok(())
            }
        }
    }

    async fn on_group_retired(&self, group: &GroupId) {
        // Catches branches that never reached clearance.
        self.seqs.lock().retain(|(g, _), _| g != group);
    }
}
