//! # Statement Model
//!
//! Structured view of intercepted SQL. Parsing is a collaborator concern;
//! the core receives a statement kind, the target table, and row data on
//! request, and turns before-images into replayable compensation ops.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One row, column name to value. `BTreeMap` keeps column order stable
/// across serialization so undo payloads are byte-comparable.
pub type Row = BTreeMap<String, Value>;

/// Kind of an intercepted mutating statement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatementKind {
    /// `UPDATE`: before-image captured prior to execution.
    Update,
    /// `DELETE`: before-image captured prior to execution.
    Delete,
    /// `INSERT`: generated keys captured after execution.
    Insert,
    /// `SELECT ... FOR UPDATE`: lock-bearing, produces no undo entry.
    SelectForUpdate,
}

/// What the interception hook hands the core before a statement runs.
#[derive(Clone, Debug)]
pub struct StatementCapture {
    /// Datasource the statement executes against.
    pub datasource: String,
    /// Target table.
    pub table: String,
    /// Statement kind.
    pub kind: StatementKind,
    /// Primary-key columns of the target table.
    pub key_columns: Vec<String>,
    /// Current row images for the rows the statement will touch.
    /// Empty for `Insert` and `SelectForUpdate`.
    pub before_rows: Vec<Row>,
}

/// Durable payload describing how to compensate one statement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RollbackPayload {
    /// Restore prior row images (compensates `UPDATE`).
    RestoreRows {
        /// Target table.
        table: String,
        /// Primary-key columns used to locate each row.
        key_columns: Vec<String>,
        /// Full prior images.
        rows: Vec<Row>,
    },
    /// Re-insert deleted rows (compensates `DELETE`).
    ReinsertRows {
        /// Target table.
        table: String,
        /// Full prior images.
        rows: Vec<Row>,
    },
    /// Delete by generated key (compensates `INSERT`).
    DeleteByKeys {
        /// Target table.
        table: String,
        /// Primary-key columns.
        key_columns: Vec<String>,
        /// Generated key rows captured after execution.
        keys: Vec<Row>,
    },
}

impl RollbackPayload {
    /// Expand into the concrete operations a connection must execute,
    /// in order, to undo the original statement.
    pub fn compensation_ops(&self) -> Vec<StatementOp> {
        match self {
            RollbackPayload::RestoreRows {
                table,
                key_columns,
                rows,
            } => rows
                .iter()
                .map(|row| StatementOp::UpdateByKey {
                    table: table.clone(),
                    key: project(row, key_columns),
                    values: row.clone(),
                })
                .collect(),
            RollbackPayload::ReinsertRows { table, rows } => rows
                .iter()
                .map(|row| StatementOp::Insert {
                    table: table.clone(),
                    row: row.clone(),
                })
                .collect(),
            RollbackPayload::DeleteByKeys {
                table,
                key_columns,
                keys,
            } => keys
                .iter()
                .map(|key_row| StatementOp::DeleteByKey {
                    table: table.clone(),
                    key: project(key_row, key_columns),
                })
                .collect(),
        }
    }
}

/// Project the key columns out of a row image.
fn project(row: &Row, key_columns: &[String]) -> Row {
    row.iter()
        .filter(|(col, _)| key_columns.iter().any(|k| k == *col))
        .map(|(col, val)| (col.clone(), val.clone()))
        .collect()
}

/// One executable operation against a datasource. Used both by business
/// writes in tests and by compensation replay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum StatementOp {
    /// Overwrite the row matching `key` with `values`.
    UpdateByKey {
        /// Target table.
        table: String,
        /// Key columns and values identifying the row.
        key: Row,
        /// Full replacement image.
        values: Row,
    },
    /// Insert a row.
    Insert {
        /// Target table.
        table: String,
        /// Row to insert.
        row: Row,
    },
    /// Delete the row matching `key`.
    DeleteByKey {
        /// Target table.
        table: String,
        /// Key columns and values identifying the row.
        key: Row,
    },
}
