//! # Domain Layer
//!
//! Identifiers, durable records, the per-call context, the statement
//! model, and the error taxonomy. No I/O and no protocol logic here.

pub mod entities;
pub mod errors;
pub mod statements;
pub mod value_objects;

pub use entities::{AspectLog, BranchDescriptor, TxContext, TxExceptionRecord, TxHeaders, UndoLogEntry};
pub use errors::{TxError, TxResult};
pub use statements::{Row, RollbackPayload, StatementCapture, StatementKind, StatementOp};
pub use value_objects::{
    now_secs, GroupId, PropagationPolicy, PropagationState, RegistrarCode, TransactionOutcome,
    TransactionType, UnitId,
};
