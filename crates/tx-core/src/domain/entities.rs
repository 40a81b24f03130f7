//! # Domain Entities
//!
//! Durable records and the explicit per-call context. The context is an
//! immutable value threaded through every call instead of ambient
//! thread-local state, so the same design runs under task-based execution.

use super::statements::{RollbackPayload, StatementKind};
use super::value_objects::{
    now_secs, GroupId, PropagationPolicy, PropagationState, RegistrarCode, TransactionOutcome,
    TransactionType, UnitId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Immutable per-call transaction context. Created when a call is
/// classified by the propagation resolver and passed explicitly to
/// everything that runs inside the boundary.
#[derive(Clone, Debug)]
pub struct TxContext {
    /// Group this call belongs to.
    pub group_id: GroupId,
    /// This call's branch identifier.
    pub unit_id: UnitId,
    /// Protocol the branch runs under.
    pub tx_type: TransactionType,
    /// How the call joined the group.
    pub state: PropagationState,
    /// Whether this node originated the group.
    pub is_starter: bool,
}

/// Wire headers carried on outbound RPC while inside a group: the group
/// id plus the service-to-address affinity map recorded so far.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxHeaders {
    /// Group identifier propagated to callees.
    pub group_id: String,
    /// Affinity snapshot: service id to the address already chosen for
    /// it within this group.
    pub affinity: HashMap<String, String>,
}

/// Serialized branch descriptor stored in the aspect log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchDescriptor {
    /// Node that recorded the branch.
    pub node_id: String,
    /// Protocol of the branch.
    pub tx_type: TransactionType,
    /// How the branch joined its group.
    pub state: PropagationState,
    /// Policy declared at the call site.
    pub policy: PropagationPolicy,
}

/// Durable write-once record of what a branch did. Answers remote
/// "what did you do" queries and survives for diagnosis.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AspectLog {
    /// Group identifier.
    pub group_id: GroupId,
    /// Unit identifier.
    pub unit_id: UnitId,
    /// Branch descriptor payload.
    pub descriptor: BranchDescriptor,
    /// Unix seconds at creation.
    pub created_at: u64,
}

impl AspectLog {
    /// Record a branch at join time.
    pub fn record(group_id: GroupId, unit_id: UnitId, descriptor: BranchDescriptor) -> Self {
        Self {
            group_id,
            unit_id,
            descriptor,
            created_at: now_secs(),
        }
    }
}

/// One undo-log row, produced per mutating statement executed in-group
/// under TXC. Deleted on commit, replayed then deleted on rollback.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UndoLogEntry {
    /// Entry identifier.
    pub id: String,
    /// Datasource the statement ran against.
    pub datasource: String,
    /// Owning unit.
    pub unit_id: UnitId,
    /// Owning group.
    pub group_id: GroupId,
    /// Kind of the original statement.
    pub kind: StatementKind,
    /// How to compensate it.
    pub payload: RollbackPayload,
    /// Unix seconds at capture.
    pub created_at: u64,
    /// Monotone per-branch sequence. Replay undoes entries in strictly
    /// descending `seq` order (last applied, first undone).
    pub seq: u64,
}

/// Append-only diagnostic record written when a branch outcome could not
/// be determined or applied normally.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxExceptionRecord {
    /// Group identifier.
    pub group_id: GroupId,
    /// Unit identifier.
    pub unit_id: UnitId,
    /// What went wrong.
    pub registrar: RegistrarCode,
    /// Outcome the branch was driven toward when the failure occurred.
    pub state: TransactionOutcome,
    /// Unix seconds at report time.
    pub created_at: u64,
}

impl TxExceptionRecord {
    /// Build a record stamped with the current time.
    pub fn report(
        group_id: GroupId,
        unit_id: UnitId,
        registrar: RegistrarCode,
        state: TransactionOutcome,
    ) -> Self {
        Self {
            group_id,
            unit_id,
            registrar,
            state,
            created_at: now_secs(),
        }
    }
}
