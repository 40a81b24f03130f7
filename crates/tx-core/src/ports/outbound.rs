//! # Outbound Ports
//!
//! Traits for external collaborators the core depends on: the cluster
//! messaging substrate, the shared cache, the durable local log stores,
//! the connection pool, and the default load balancer. In-memory
//! implementations live in [`crate::adapters`].

use crate::domain::{
    AspectLog, GroupId, StatementOp, TransactionOutcome, TxExceptionRecord, TxResult,
    UndoLogEntry, UnitId,
};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Cluster messaging substrate. Delivery is at-least-once and unordered
/// across groups; every handler reachable through it must be idempotent.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Broadcast the group outcome to every node holding branches of the
    /// group.
    async fn notify_group(&self, group: &GroupId, outcome: TransactionOutcome) -> TxResult<()>;

    /// Ask the authoritative node for the group outcome. Used by the
    /// delayed checker when normal completion signaling never arrived.
    async fn ask_transaction_state(
        &self,
        group: &GroupId,
        unit: &UnitId,
    ) -> TxResult<TransactionOutcome>;

    /// Fetch a remote branch's aspect log for diagnosis.
    async fn fetch_aspect_log(&self, group: &GroupId, unit: &UnitId) -> TxResult<AspectLog>;
}

/// Generic shared key-value cache provided by the cluster substrate. The
/// core uses it only for optional group-outcome lookups.
#[async_trait]
pub trait SharedCache: Send + Sync {
    /// Store a value.
    async fn put(&self, key: &str, value: Value) -> TxResult<()>;

    /// Fetch a value, if present.
    async fn get(&self, key: &str) -> TxResult<Option<Value>>;
}

/// Durable write-once store for branch descriptors, local to each node
/// and surviving restart.
#[async_trait]
pub trait AspectLogStore: Send + Sync {
    /// Record a branch descriptor. Write-once: a second append for the
    /// same `(group, unit)` keeps the first record.
    async fn append(&self, log: AspectLog) -> TxResult<()>;

    /// Fetch a branch descriptor.
    async fn get(&self, group: &GroupId, unit: &UnitId) -> TxResult<Option<AspectLog>>;

    /// Finalize (remove) a branch descriptor after clearance.
    async fn remove(&self, group: &GroupId, unit: &UnitId) -> TxResult<()>;
}

/// Durable store for undo-log entries, local to each node.
#[async_trait]
pub trait UndoLogStore: Send + Sync {
    /// Append one entry. Assumed to share durability with the branch's
    /// own local commit.
    async fn append(&self, entry: UndoLogEntry) -> TxResult<()>;

    /// All entries for a branch, ascending by `seq`.
    async fn fetch(&self, group: &GroupId, unit: &UnitId) -> TxResult<Vec<UndoLogEntry>>;

    /// Delete all entries for a branch; returns how many were removed.
    async fn delete_all(&self, group: &GroupId, unit: &UnitId) -> TxResult<u64>;
}

/// Append-only store of diagnostic records for branches whose outcome
/// could not be determined or applied normally.
#[async_trait]
pub trait TxExceptionStore: Send + Sync {
    /// Append a diagnostic record.
    async fn report(&self, record: TxExceptionRecord) -> TxResult<()>;

    /// All recorded diagnostics, oldest first.
    async fn list(&self) -> TxResult<Vec<TxExceptionRecord>>;
}

/// Connection pool over the node's datasources.
#[async_trait]
pub trait DataSourcePool: Send + Sync {
    /// Open a connection. With `auto_commit` disabled the connection
    /// buffers writes until an explicit commit or rollback.
    async fn connection(
        &self,
        datasource: &str,
        auto_commit: bool,
    ) -> TxResult<Arc<dyn TxConnection>>;
}

/// One pooled connection.
#[async_trait]
pub trait TxConnection: Send + Sync {
    /// Datasource this connection belongs to.
    fn datasource(&self) -> &str;

    /// Execute one structured operation; returns affected row count.
    async fn execute(&self, op: &StatementOp) -> TxResult<u64>;

    /// Commit buffered work and release to the pool.
    async fn commit(&self) -> TxResult<()>;

    /// Discard buffered work and release to the pool.
    async fn rollback(&self) -> TxResult<()>;
}

/// Default instance selection for outbound calls; affinity routing wraps
/// this and only delegates on an affinity miss.
#[async_trait]
pub trait LoadBalancer: Send + Sync {
    /// Pick an instance address for a service, if any is available.
    async fn select(&self, service_id: &str, instances: &[String]) -> Option<String>;
}
