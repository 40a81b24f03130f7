//! # Transaction Type Strategies
//!
//! Three pluggable protocol implementations behind one trait: LCN
//! (held resources), TCC (try/confirm/cancel), TXC (undo-log
//! compensation). The registry is an immutable function table built once
//! at startup and looked up by transaction type; strategies are never
//! mutated after construction.

pub mod lcn;
pub mod tcc;
pub mod txc;

use crate::domain::{GroupId, TransactionOutcome, TransactionType, TxContext, TxError, TxResult, UnitId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

pub use lcn::{HeldResource, LcnStrategy};
pub use tcc::{TccBinding, TccStrategy};
pub use txc::TxcStrategy;

/// Protocol hooks every transaction type implements.
///
/// The business hooks run around the caller's business code on the
/// caller's own task; `clear` runs later, on whichever path learned the
/// group outcome first (normal completion, inbound notify, or the
/// delayed checker), and must therefore tolerate repeated invocation.
#[async_trait]
pub trait TransactionStrategy: Send + Sync {
    /// The protocol this strategy implements.
    fn transaction_type(&self) -> TransactionType;

    /// Runs after activation, before business code.
    async fn on_business_start(&self, ctx: &TxContext) -> TxResult<()>;

    /// Runs when business code returned successfully.
    async fn on_business_success(&self, ctx: &TxContext) -> TxResult<()>;

    /// Runs when business code failed, whatever the error type.
    async fn on_business_error(&self, ctx: &TxContext) -> TxResult<()>;

    /// Finalize one branch once the group outcome is known.
    async fn clear(
        &self,
        group: &GroupId,
        unit: &UnitId,
        outcome: TransactionOutcome,
    ) -> TxResult<()>;

    /// Runs when the group's context is retired from this node. A
    /// strategy that keeps per-branch bookkeeping outside the context
    /// drops the group's entries here; without the context, no further
    /// clearance can reach the group.
    async fn on_group_retired(&self, _group: &GroupId) {}
}

/// Immutable strategy lookup table, built once at coordinator startup.
pub struct StrategyRegistry {
    strategies: HashMap<TransactionType, Arc<dyn TransactionStrategy>>,
}

impl StrategyRegistry {
    /// Build the registry from the three fixed protocol variants.
    pub fn new(
        lcn: Arc<LcnStrategy>,
        tcc: Arc<TccStrategy>,
        txc: Arc<TxcStrategy>,
    ) -> Self {
        let mut strategies: HashMap<TransactionType, Arc<dyn TransactionStrategy>> =
            HashMap::new();
        strategies.insert(TransactionType::Lcn, lcn);
        strategies.insert(TransactionType::Tcc, tcc);
        strategies.insert(TransactionType::Txc, txc);
        Self { strategies }
    }

    /// Look up the strategy for a transaction type.
    pub fn get(&self, tx_type: TransactionType) -> TxResult<Arc<dyn TransactionStrategy>> {
        self.strategies
            .get(&tx_type)
            .cloned()
            .ok_or(TxError::StrategyUnavailable(tx_type))
    }

    /// Every registered strategy, for group-retirement fan-out.
    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn TransactionStrategy>> {
        self.strategies.values()
    }
}
