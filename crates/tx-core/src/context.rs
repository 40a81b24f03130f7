//! # Group Context Store
//!
//! One mutable context per active transaction group on this node; the
//! central synchronization point between business execution and the
//! recovery / remote-notification paths.

use crate::domain::{GroupId, TransactionType, UnitId};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// One recorded branch of the group on this node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnitRecord {
    /// Branch identifier.
    pub unit_id: UnitId,
    /// Protocol of the branch.
    pub tx_type: TransactionType,
}

/// Per-group mutable state, exclusively owned by the node that created
/// or joined the group. Cross-node visibility happens only through
/// explicit messages, never shared memory.
pub struct GroupContext {
    group_id: GroupId,
    is_starter: bool,
    units: Mutex<Vec<UnitRecord>>,
    /// First unit recorded per transaction type; drives the reentrancy
    /// rule for nested same-node calls.
    first_units: Mutex<HashMap<TransactionType, UnitId>>,
    /// Arbitrary attachments keyed by type name (held resources, TCC
    /// bindings).
    attachments: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
    /// Service id to chosen instance address, for affinity routing.
    affinity: Mutex<HashMap<String, String>>,
    /// Branches already cleared on this node; makes clearance idempotent.
    cleared: Mutex<HashSet<UnitId>>,
    /// Sticky completion signal. One business task signals; the watchdog
    /// and inbound notify handlers wait with a bound.
    completed: watch::Sender<bool>,
}

impl GroupContext {
    fn new(group_id: GroupId, is_starter: bool) -> Self {
        let (completed, _) = watch::channel(false);
        Self {
            group_id,
            is_starter,
            units: Mutex::new(Vec::new()),
            first_units: Mutex::new(HashMap::new()),
            attachments: Mutex::new(HashMap::new()),
            affinity: Mutex::new(HashMap::new()),
            cleared: Mutex::new(HashSet::new()),
            completed,
        }
    }

    /// The group this context belongs to.
    pub fn group_id(&self) -> &GroupId {
        &self.group_id
    }

    /// Whether this node originated the group.
    pub fn is_starter(&self) -> bool {
        self.is_starter
    }

    /// Record a branch. The first unit per transaction type becomes the
    /// primary unit for that type.
    pub fn register_unit(&self, unit_id: UnitId, tx_type: TransactionType) {
        self.first_units
            .lock()
            .entry(tx_type)
            .or_insert_with(|| unit_id.clone());
        self.units.lock().push(UnitRecord { unit_id, tx_type });
    }

    /// Snapshot of all branches recorded so far.
    pub fn units(&self) -> Vec<UnitRecord> {
        self.units.lock().clone()
    }

    /// Whether `unit_id` is the first branch recorded for `tx_type`.
    /// Reentrant units of the same type are not primary and must not
    /// drive success/error hooks.
    pub fn is_primary_unit(&self, tx_type: TransactionType, unit_id: &UnitId) -> bool {
        self.first_units.lock().get(&tx_type) == Some(unit_id)
    }

    /// Attach a value under a type-name key. Last writer wins for the
    /// same key, which is what makes repeated resource registration for
    /// the same `(group, datasource)` collapse to one stored resource.
    pub fn attach<T: Any + Send + Sync>(&self, key: &str, value: Arc<T>) {
        self.attachments.lock().insert(key.to_string(), value);
    }

    /// Attach a value unless the key is already taken; returns the
    /// stored value either way. Used for resource registration where two
    /// racing acquisitions must collapse to one stored resource.
    pub fn attach_if_absent<T: Any + Send + Sync>(&self, key: &str, value: Arc<T>) -> Arc<T> {
        let mut attachments = self.attachments.lock();
        let stored = attachments
            .entry(key.to_string())
            .or_insert_with(|| value.clone());
        stored
            .clone()
            .downcast::<T>()
            .unwrap_or_else(|_| {
                // Key collision across types: last writer of this call wins.
                attachments.insert(key.to_string(), value.clone());
                value
            })
    }

    /// Look up an attachment by key, downcast to the requested type.
    pub fn lookup<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.attachments
            .lock()
            .get(key)
            .cloned()
            .and_then(|any| any.downcast::<T>().ok())
    }

    /// Remove and return every attachment whose key starts with `prefix`.
    pub fn drain_attachments(&self, prefix: &str) -> Vec<(String, Arc<dyn Any + Send + Sync>)> {
        let mut attachments = self.attachments.lock();
        let keys: Vec<String> = attachments
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.into_iter()
            .filter_map(|k| attachments.remove(&k).map(|v| (k, v)))
            .collect()
    }

    /// Recorded address for a service within this group, if any.
    pub fn affinity_for(&self, service_id: &str) -> Option<String> {
        self.affinity.lock().get(service_id).cloned()
    }

    /// Record the address chosen for a service within this group.
    pub fn record_affinity(&self, service_id: &str, address: &str) {
        self.affinity
            .lock()
            .insert(service_id.to_string(), address.to_string());
    }

    /// Snapshot of the affinity map, for outbound header propagation.
    pub fn affinity_snapshot(&self) -> HashMap<String, String> {
        self.affinity.lock().clone()
    }

    /// Merge an inherited affinity snapshot from inbound headers.
    pub fn merge_affinity(&self, inherited: &HashMap<String, String>) {
        let mut affinity = self.affinity.lock();
        for (service, address) in inherited {
            affinity
                .entry(service.clone())
                .or_insert_with(|| address.clone());
        }
    }

    /// Mark a branch cleared. Returns `false` if it was already cleared,
    /// letting the watchdog no-op after normal clearance and vice versa.
    pub fn mark_cleared(&self, unit_id: &UnitId) -> bool {
        self.cleared.lock().insert(unit_id.clone())
    }

    /// Whether every registered branch has been cleared; once true the
    /// context can be removed.
    pub fn all_cleared(&self) -> bool {
        let units = self.units.lock();
        let cleared = self.cleared.lock();
        units.iter().all(|u| cleared.contains(&u.unit_id))
    }

    /// Signal that local business code finished. Sticky: waiters arriving
    /// after the signal return immediately.
    pub fn mark_complete(&self) {
        self.completed.send_replace(true);
    }

    /// Wait for the completion signal, up to `bound`. Returns whether the
    /// signal was observed. Never blocks indefinitely.
    pub async fn wait_complete(&self, bound: Duration) -> bool {
        let mut rx = self.completed.subscribe();
        if *rx.borrow() {
            return true;
        }
        tokio::time::timeout(bound, async {
            while rx.changed().await.is_ok() {
                if *rx.borrow() {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false)
    }
}

/// Thread-safe registry of live group contexts, owned by the coordinator
/// instance. At most one live context per group id per node.
#[derive(Default)]
pub struct GroupContextStore {
    groups: RwLock<HashMap<GroupId, Arc<GroupContext>>>,
}

impl GroupContextStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the context for a group, or return the existing one.
    /// Concurrent creation for the same id is idempotent: first writer
    /// wins, later callers get the stored context.
    pub fn create(&self, group_id: GroupId, is_starter: bool) -> Arc<GroupContext> {
        let mut groups = self.groups.write();
        Arc::clone(
            groups
                .entry(group_id.clone())
                .or_insert_with(|| Arc::new(GroupContext::new(group_id, is_starter))),
        )
    }

    /// Look up a live context.
    pub fn get(&self, group_id: &GroupId) -> Option<Arc<GroupContext>> {
        self.groups.read().get(group_id).cloned()
    }

    /// Remove a context once clearance for this node's branches is done.
    pub fn remove(&self, group_id: &GroupId) -> Option<Arc<GroupContext>> {
        let removed = self.groups.write().remove(group_id);
        if removed.is_some() {
            debug!(group = %group_id, "group context removed");
        }
        removed
    }

    /// Number of live contexts on this node.
    pub fn len(&self) -> usize {
        self.groups.read().len()
    }

    /// Whether no groups are live.
    pub fn is_empty(&self) -> bool {
        self.groups.read().is_empty()
    }
}
