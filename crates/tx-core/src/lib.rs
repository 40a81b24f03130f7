//! # tx-core
//!
//! Distributed transaction coordination core: groups a set of local
//! transaction branches spread across service nodes and drives them to a
//! single commit-or-rollback outcome under three consistency protocols.
//!
//! ## Purpose
//!
//! A business call chain that crosses service boundaries opens one
//! *transaction group*. Every participating local transaction joins the
//! group as a *unit* and defers its finalization; when the originating
//! node (the *starter*) finishes, the outcome is broadcast and every node
//! clears its branches accordingly. Nodes that miss the broadcast recover
//! through a per-branch watchdog that asks the starter for the
//! authoritative outcome.
//!
//! ## Consistency Protocols
//!
//! | Protocol | Mechanism | Clearance |
//! |----------|-----------|-----------|
//! | LCN | Hold the real connection with auto-commit off | Commit or roll back the held connection |
//! | TCC | Bind confirm/cancel references at Try time | Invoke confirm (commit) or cancel (rollback) |
//! | TXC | Capture before-images into an undo log | Delete the log (commit) or replay it in reverse (rollback) |
//!
//! ## Group Lifecycle
//!
//! ```text
//! starter                               joiner
//!   │ begin ──→ Create (new group id)     │
//!   │ ── RPC with group headers ────────→ │ begin ──→ JoinOtherNode
//!   │                                     │ business work, unit recorded
//!   │ ←──────────────── RPC returns ───── │ (watchdog armed)
//!   │ succeed/fail ──→ outcome recorded   │
//!   │ ── notify-group(outcome) ─────────→ │ clear branches, retire context
//! ```
//!
//! Timeouts, lost notifications, and duplicate deliveries are handled by
//! the [`checker::DelayedChecker`] and the idempotent
//! [`clearance::ClearancePipeline`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tx_core::{
//!     CoordinatorDeps, PropagationPolicy, TransactionCoordinator, TransactionType, TxConfig,
//! };
//!
//! let coordinator = TransactionCoordinator::new("node-a", TxConfig::default(), deps);
//! let ctx = coordinator
//!     .begin(PropagationPolicy::Required, TransactionType::Lcn, None, None)
//!     .await?
//!     .expect("Required always yields a context");
//!
//! // ... business work against coordinator.held_connection(&ctx, "orders") ...
//!
//! coordinator.succeed(&ctx).await?;
//! ```
//!
//! ## Module Structure (Hexagonal Architecture)
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      OUTER LAYER                                │
//! │  adapters/  - in-memory bus, cache, stores, datasource pool     │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ implements ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      MIDDLE LAYER                               │
//! │  ports/inbound.rs  - RemoteCommandHandler, SqlInterception,     │
//! │                      TccExecutor                                │
//! │  ports/outbound.rs - MessageBus, SharedCache, log stores,       │
//! │                      DataSourcePool, LoadBalancer               │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ uses ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      INNER LAYER                                │
//! │  domain/       - ids, contexts, logs, statements, errors        │
//! │  propagation   - policy to state resolution                     │
//! │  context       - per-group mutable state and completion signal  │
//! │  strategy/     - LCN / TCC / TXC protocol implementations       │
//! │  clearance     - idempotent branch clearance pipeline           │
//! │  checker       - delayed watchdog and outcome reconciliation    │
//! │  routing       - transaction-affinity load balancing            │
//! │  coordinator   - service facade wiring it all together          │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod checker;
pub mod clearance;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod domain;
pub mod ports;
pub mod propagation;
pub mod routing;
pub mod strategy;

pub use config::TxConfig;
pub use context::{GroupContext, GroupContextStore};
pub use coordinator::{CoordinatorDeps, TransactionCoordinator};
pub use domain::{
    AspectLog, BranchDescriptor, GroupId, PropagationPolicy, PropagationState, Row,
    StatementCapture, StatementKind, StatementOp, TransactionOutcome, TransactionType, TxContext,
    TxError, TxExceptionRecord, TxHeaders, TxResult, UndoLogEntry, UnitId,
};
pub use routing::AffinityRouter;
pub use strategy::{StrategyRegistry, TransactionStrategy};

/// Crate version, surfaced for diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
