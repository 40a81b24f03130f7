//! # Domain Value Objects
//!
//! Immutable value types shared by every protocol: identifiers, the
//! propagation state machine inputs/outputs, and the clearance outcome.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of one distributed transaction group.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub String);

impl GroupId {
    /// Mint a fresh group identifier (done only by the starter node).
    pub fn mint() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one branch (unit) within a group, local to one node.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId(pub String);

impl UnitId {
    /// Mint a fresh unit identifier.
    pub fn mint() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Consistency protocol a branch runs under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    /// Held-resource style: one auto-commit-disabled connection per
    /// `(group, datasource)` kept open until the group outcome is known.
    Lcn,
    /// Try/confirm/cancel style.
    Tcc,
    /// Automatic compensation driven by captured row before-images.
    Txc,
}

impl TransactionType {
    /// Stable lookup name, used in log fields and attachment keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Lcn => "lcn",
            TransactionType::Tcc => "tcc",
            TransactionType::Txc => "txc",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared per-call propagation policy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropagationPolicy {
    /// The call must not run inside a distributed transaction.
    Never,
    /// Join a transaction when one exists, otherwise run without one.
    Supports,
    /// A transaction must already exist; starting one here is an error.
    Mandatory,
    /// Join the existing transaction or start a new one.
    #[default]
    Required,
}

/// How a call relates to a transaction group. Derived by the propagation
/// resolver, never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropagationState {
    /// First transactional boundary: mint a new group (starter).
    Create,
    /// Nested transactional call on a node already inside the group.
    JoinLocalNode,
    /// Inbound group id from a caller; this node joins as a new branch.
    JoinOtherNode,
    /// Run without a distributed transaction.
    None,
}

impl PropagationState {
    /// Whether the call participates in a group at all.
    pub fn in_group(&self) -> bool {
        !matches!(self, PropagationState::None)
    }
}

/// Final outcome applied to every branch of a group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionOutcome {
    /// Make the branch's effects permanent.
    Commit,
    /// Undo or compensate the branch's effects.
    Rollback,
}

impl fmt::Display for TransactionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionOutcome::Commit => f.write_str("commit"),
            TransactionOutcome::Rollback => f.write_str("rollback"),
        }
    }
}

/// Why a branch outcome had to be recorded as a diagnostic instead of
/// resolved normally.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrarCode {
    /// The ask-state round-trip to the authoritative node failed.
    AskError,
    /// The strategy's clearance routine returned an error.
    ClearFailed,
}

/// Seconds since the unix epoch; the timestamp granularity used by every
/// durable record.
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
