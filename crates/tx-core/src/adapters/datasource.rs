//! In-memory datasource and connection pool.
//!
//! A row store per datasource with auto-commit and buffered connection
//! modes, plus commit/rollback counters so tests can assert that a held
//! resource is finalized exactly once.

use crate::domain::{Row, StatementOp, TxError, TxResult};
use crate::ports::outbound::{DataSourcePool, TxConnection};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// One named datasource: tables of rows plus finalization counters.
pub struct InMemoryDataSource {
    name: String,
    tables: RwLock<HashMap<String, Vec<Row>>>,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

impl InMemoryDataSource {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tables: RwLock::new(HashMap::new()),
            commits: AtomicU64::new(0),
            rollbacks: AtomicU64::new(0),
        }
    }

    /// Datasource name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replace a table's contents (test setup).
    pub fn seed_table(&self, table: &str, rows: Vec<Row>) {
        self.tables.write().insert(table.to_string(), rows);
    }

    /// Snapshot of a table's rows.
    pub fn read_table(&self, table: &str) -> Vec<Row> {
        self.tables.read().get(table).cloned().unwrap_or_default()
    }

    /// Number of explicit commits performed against this datasource.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Number of explicit rollbacks performed against this datasource.
    pub fn rollback_count(&self) -> u64 {
        self.rollbacks.load(Ordering::SeqCst)
    }

    fn apply(&self, op: &StatementOp) -> u64 {
        let mut tables = self.tables.write();
        match op {
            StatementOp::UpdateByKey { table, key, values } => {
                let rows = tables.entry(table.clone()).or_default();
                let mut affected = 0;
                for row in rows.iter_mut() {
                    if matches_key(row, key) {
                        *row = values.clone();
                        affected += 1;
                    }
                }
                affected
            }
            StatementOp::Insert { table, row } => {
                tables.entry(table.clone()).or_default().push(row.clone());
                1
            }
            StatementOp::DeleteByKey { table, key } => {
                let rows = tables.entry(table.clone()).or_default();
                let before = rows.len();
                rows.retain(|row| !matches_key(row, key));
                (before - rows.len()) as u64
            }
        }
    }
}

fn matches_key(row: &Row, key: &Row) -> bool {
    key.iter().all(|(col, val)| row.get(col) == Some(val))
}

/// Pool creating datasources on demand and handing out connections.
#[derive(Default)]
pub struct InMemoryDataSourcePool {
    sources: RwLock<HashMap<String, Arc<InMemoryDataSource>>>,
}

impl InMemoryDataSourcePool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// The datasource with this name, created on first use.
    pub fn source(&self, name: &str) -> Arc<InMemoryDataSource> {
        let mut sources = self.sources.write();
        Arc::clone(
            sources
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(InMemoryDataSource::new(name))),
        )
    }
}

#[async_trait]
impl DataSourcePool for InMemoryDataSourcePool {
    async fn connection(
        &self,
        datasource: &str,
        auto_commit: bool,
    ) -> TxResult<Arc<dyn TxConnection>> {
        Ok(Arc::new(InMemoryConnection {
            source: self.source(datasource),
            auto_commit,
            pending: Mutex::new(Vec::new()),
            released: AtomicBool::new(false),
        }))
    }
}

/// One connection. With auto-commit disabled, operations buffer until an
/// explicit commit applies them or a rollback discards them; either way
/// the connection is released and refuses further finalization.
pub struct InMemoryConnection {
    source: Arc<InMemoryDataSource>,
    auto_commit: bool,
    pending: Mutex<Vec<StatementOp>>,
    released: AtomicBool,
}

impl InMemoryConnection {
    fn take_release(&self) -> TxResult<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Err(TxError::Datasource(format!(
                "connection to {} already released",
                self.source.name()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl TxConnection for InMemoryConnection {
    fn datasource(&self) -> &str {
        self.source.name()
    }

    async fn execute(&self, op: &StatementOp) -> TxResult<u64> {
        if self.released.load(Ordering::SeqCst) {
            return Err(TxError::Datasource(format!(
                "connection to {} already released",
                self.source.name()
            )));
        }
        if self.auto_commit {
            return Ok(self.source.apply(op));
        }
        self.pending.lock().push(op.clone());
        Ok(1)
    }

    async fn commit(&self) -> TxResult<()> {
        self.take_release()?;
        let pending = std::mem::take(&mut *self.pending.lock());
        debug!(datasource = self.source.name(), ops = pending.len(), "commit");
        for op in &pending {
            self.source.apply(op);
        }
        self.source.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> TxResult<()> {
        self.take_release()?;
        let dropped = self.pending.lock().len();
        debug!(datasource = self.source.name(), ops = dropped, "rollback");
        self.pending.lock().clear();
        self.source.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
