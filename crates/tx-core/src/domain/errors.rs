//! # Domain Errors
//!
//! Error taxonomy for the coordination core. Not-found variants are kept
//! distinct from transport variants because callers branch on them: LCN
//! resource acquisition creates on miss, the notify handler treats a
//! missing group as an already-cleared branch.

use super::value_objects::{GroupId, PropagationPolicy, TransactionType, UnitId};
use thiserror::Error;

/// Errors surfaced by the coordination core.
#[derive(Debug, Error)]
pub enum TxError {
    /// A declared propagation policy cannot be honored for this call.
    /// Fatal to the call, never retried.
    #[error("propagation violation under {policy:?}: {reason}")]
    PropagationViolation {
        /// The declared policy.
        policy: PropagationPolicy,
        /// Why it could not be honored.
        reason: &'static str,
    },

    /// No live group context for this id on this node.
    #[error("group not found: {0}")]
    GroupNotFound(GroupId),

    /// No attachment under this key in the group context.
    #[error("resource not found in group {group}: {key}")]
    ResourceNotFound {
        /// The group whose context was consulted.
        group: GroupId,
        /// The attachment key that missed.
        key: String,
    },

    /// No aspect log stored for this branch.
    #[error("aspect log not found: group={group} unit={unit}")]
    AspectLogNotFound {
        /// Group identifier.
        group: GroupId,
        /// Unit identifier.
        unit: UnitId,
    },

    /// The authoritative outcome for a group could not be determined.
    #[error("transaction outcome unknown for group {0}")]
    OutcomeUnknown(GroupId),

    /// A strategy's clearance routine failed; the branch is left for
    /// operator inspection.
    #[error("clearance failed: group={group} unit={unit}: {detail}")]
    ClearanceFailure {
        /// Group identifier.
        group: GroupId,
        /// Unit identifier.
        unit: UnitId,
        /// Underlying failure.
        detail: String,
    },

    /// Transport-level messaging failure (send, round-trip, or timeout).
    #[error("messaging error: {0}")]
    Messaging(String),

    /// Datasource or connection-pool failure.
    #[error("datasource error: {0}")]
    Datasource(String),

    /// Undo-log replay failed while compensating a branch.
    #[error("undo replay failed: group={group} unit={unit}: {detail}")]
    UndoReplay {
        /// Group identifier.
        group: GroupId,
        /// Unit identifier.
        unit: UnitId,
        /// Underlying failure.
        detail: String,
    },

    /// No strategy registered for the requested transaction type.
    #[error("no strategy registered for transaction type {0}")]
    StrategyUnavailable(TransactionType),
}

impl TxError {
    /// Whether this is a typed not-found, as opposed to a transport or
    /// clearance failure.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            TxError::GroupNotFound(_)
                | TxError::ResourceNotFound { .. }
                | TxError::AspectLogNotFound { .. }
        )
    }
}

/// Convenience alias used throughout the crate.
pub type TxResult<T> = Result<T, TxError>;
