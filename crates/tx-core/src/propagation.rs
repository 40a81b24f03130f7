//! # Propagation Resolver
//!
//! Pure classification of how a call relates to a transaction group.
//! Activation (allocating the group context, marking the call in-group)
//! belongs to the strategy hook bound to the resulting state, never here.

use crate::domain::{PropagationPolicy, PropagationState, TxError, TxResult};

/// Decide how a call joins or starts a group.
///
/// * `in_local_group` - the current call chain is already inside a group
///   on this node.
/// * `has_inbound_group` - the call carries a group id from a caller.
pub fn resolve(
    policy: PropagationPolicy,
    in_local_group: bool,
    has_inbound_group: bool,
) -> TxResult<PropagationState> {
    if in_local_group {
        return match policy {
            PropagationPolicy::Never => Err(TxError::PropagationViolation {
                policy,
                reason: "already inside a transaction group on this node",
            }),
            _ => Ok(PropagationState::JoinLocalNode),
        };
    }

    if !has_inbound_group {
        // First transactional boundary: this call would be the starter.
        return match policy {
            PropagationPolicy::Supports | PropagationPolicy::Never => Ok(PropagationState::None),
            PropagationPolicy::Mandatory => Err(TxError::PropagationViolation {
                policy,
                reason: "no existing transaction to join",
            }),
            PropagationPolicy::Required => Ok(PropagationState::Create),
        };
    }

    // Inbound group id present, not yet activated locally.
    match policy {
        PropagationPolicy::Never => Err(TxError::PropagationViolation {
            policy,
            reason: "caller propagated a transaction group",
        }),
        _ => Ok(PropagationState::JoinOtherNode),
    }
}
