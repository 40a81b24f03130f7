//! In-memory log stores and shared cache.
//!
//! Stand-ins for the embedded durable key-ordered tables and the cluster
//! cache. `BTreeMap` keys mirror the key ordering the real storage
//! engine provides.

use crate::domain::{AspectLog, GroupId, TxExceptionRecord, TxResult, UndoLogEntry, UnitId};
use crate::ports::outbound::{AspectLogStore, SharedCache, TxExceptionStore, UndoLogStore};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// In-memory aspect log table keyed `(group, unit)`.
#[derive(Default)]
pub struct InMemoryAspectLogStore {
    rows: RwLock<BTreeMap<(String, String), AspectLog>>,
}

impl InMemoryAspectLogStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AspectLogStore for InMemoryAspectLogStore {
    async fn append(&self, log: AspectLog) -> TxResult<()> {
        let key = (log.group_id.0.clone(), log.unit_id.0.clone());
        let mut rows = self.rows.write();
        if rows.contains_key(&key) {
            debug!(group = %log.group_id, unit = %log.unit_id, "aspect log already recorded");
            return Ok(());
        }
        rows.insert(key, log);
        Ok(())
    }

    async fn get(&self, group: &GroupId, unit: &UnitId) -> TxResult<Option<AspectLog>> {
        Ok(self
            .rows
            .read()
            .get(&(group.0.clone(), unit.0.clone()))
            .cloned())
    }

    async fn remove(&self, group: &GroupId, unit: &UnitId) -> TxResult<()> {
        self.rows.write().remove(&(group.0.clone(), unit.0.clone()));
        Ok(())
    }
}

/// In-memory undo log table keyed `(group, unit, seq)`, so a range scan
/// yields entries in ascending sequence order.
#[derive(Default)]
pub struct InMemoryUndoLogStore {
    rows: RwLock<BTreeMap<(String, String, u64), UndoLogEntry>>,
}

impl InMemoryUndoLogStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UndoLogStore for InMemoryUndoLogStore {
    async fn append(&self, entry: UndoLogEntry) -> TxResult<()> {
        let key = (entry.group_id.0.clone(), entry.unit_id.0.clone(), entry.seq);
        self.rows.write().insert(key, entry);
        Ok(())
    }

    async fn fetch(&self, group: &GroupId, unit: &UnitId) -> TxResult<Vec<UndoLogEntry>> {
        let lo = (group.0.clone(), unit.0.clone(), 0);
        let hi = (group.0.clone(), unit.0.clone(), u64::MAX);
        Ok(self
            .rows
            .read()
            .range(lo..=hi)
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    async fn delete_all(&self, group: &GroupId, unit: &UnitId) -> TxResult<u64> {
        let mut rows = self.rows.write();
        let keys: Vec<_> = rows
            .range((group.0.clone(), unit.0.clone(), 0)..=(group.0.clone(), unit.0.clone(), u64::MAX))
            .map(|(k, _)| k.clone())
            .collect();
        let removed = keys.len() as u64;
        for key in keys {
            rows.remove(&key);
        }
        Ok(removed)
    }
}

/// In-memory append-only diagnostic record store.
#[derive(Default)]
pub struct InMemoryTxExceptionStore {
    rows: RwLock<Vec<TxExceptionRecord>>,
}

impl InMemoryTxExceptionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TxExceptionStore for InMemoryTxExceptionStore {
    async fn report(&self, record: TxExceptionRecord) -> TxResult<()> {
        self.rows.write().push(record);
        Ok(())
    }

    async fn list(&self) -> TxResult<Vec<TxExceptionRecord>> {
        Ok(self.rows.read().clone())
    }
}

/// In-memory shared cache.
#[derive(Default)]
pub struct InMemorySharedCache {
    map: RwLock<HashMap<String, Value>>,
}

impl InMemorySharedCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SharedCache for InMemorySharedCache {
    async fn put(&self, key: &str, value: Value) -> TxResult<()> {
        self.map.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> TxResult<Option<Value>> {
        Ok(self.map.read().get(key).cloned())
    }
}
