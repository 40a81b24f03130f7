//! # Starter/Joiner Flows
//!
//! Two coordinators wired to one in-memory bus and shared cache, driving
//! a group across node boundaries:
//!
//! 1. **Starter commit**: joiner work is finalized on notification
//! 2. **Starter rollback**: joiner work is undone even after its local
//!    business code succeeded
//! 3. **Protocol clearance**: LCN held connections, TCC confirm/cancel,
//!    TXC undo replay all fire on the notified outcome
//! 4. **Affinity propagation**: the joiner inherits the starter's
//!    instance choices through the group headers

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    use tx_core::adapters::{
        InMemoryAspectLogStore, InMemoryDataSourcePool, InMemoryMessageBus, InMemorySharedCache,
        InMemoryTxExceptionStore, InMemoryUndoLogStore, RoundRobinBalancer,
    };
    use tx_core::coordinator::{CoordinatorDeps, TransactionCoordinator};
    use tx_core::domain::{
        PropagationPolicy, PropagationState, Row, StatementCapture, StatementKind, StatementOp,
        TransactionOutcome, TransactionType, TxResult,
    };
    use tx_core::ports::inbound::{RemoteCommandHandler, SqlInterception, TccExecutor};
    use tx_core::ports::outbound::{
        AspectLogStore, DataSourcePool, TxConnection, TxExceptionStore, UndoLogStore,
    };
    use tx_core::TxConfig;

    // =========================================================================
    // TEST FIXTURES
    // =========================================================================

    /// One node of the cluster: its coordinator plus the node-local
    /// stores the tests assert against.
    struct Node {
        coordinator: Arc<TransactionCoordinator>,
        pool: Arc<InMemoryDataSourcePool>,
        undo_logs: Arc<InMemoryUndoLogStore>,
        aspect_logs: Arc<InMemoryAspectLogStore>,
        exceptions: Arc<InMemoryTxExceptionStore>,
    }

    /// Two nodes on one bus and shared cache. `register` controls which
    /// nodes actually receive bus traffic, so tests can model a node that
    /// misses notifications.
    struct Cluster {
        bus: Arc<InMemoryMessageBus>,
        cache: Arc<InMemorySharedCache>,
    }

    impl Cluster {
        fn new() -> Self {
            crate::init_tracing();
            Self {
                bus: Arc::new(InMemoryMessageBus::new()),
                cache: Arc::new(InMemorySharedCache::new()),
            }
        }

        fn node(&self, node_id: &str, config: TxConfig, register: bool) -> Node {
            let pool = Arc::new(InMemoryDataSourcePool::new());
            let undo_logs = Arc::new(InMemoryUndoLogStore::new());
            let aspect_logs = Arc::new(InMemoryAspectLogStore::new());
            let exceptions = Arc::new(InMemoryTxExceptionStore::new());
            let coordinator = TransactionCoordinator::new(
                node_id,
                config,
                CoordinatorDeps {
                    bus: self.bus.clone(),
                    cache: self.cache.clone(),
                    aspect_logs: aspect_logs.clone(),
                    undo_logs: undo_logs.clone(),
                    exceptions: exceptions.clone(),
                    pool: pool.clone(),
                    balancer: Arc::new(RoundRobinBalancer::new()),
                },
            );
            if register {
                self.bus.register(node_id, coordinator.clone());
            }
            Node {
                coordinator,
                pool,
                undo_logs,
                aspect_logs,
                exceptions,
            }
        }
    }

    fn fast_config() -> TxConfig {
        TxConfig {
            tx_timeout: Duration::from_secs(10),
            signal_wait: Duration::from_millis(100),
            ask_timeout: Duration::from_millis(200),
            shutdown_grace: Duration::from_millis(500),
        }
    }

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    /// TCC participant recording confirm/cancel invocations.
    struct RecordingExecutor {
        confirms: AtomicU64,
        cancels: AtomicU64,
        last_data: Mutex<Option<HashMap<String, Value>>>,
    }

    impl RecordingExecutor {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                confirms: AtomicU64::new(0),
                cancels: AtomicU64::new(0),
                last_data: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl TccExecutor for RecordingExecutor {
        async fn confirm(&self, data: &HashMap<String, Value>) -> TxResult<()> {
            self.confirms.fetch_add(1, Ordering::SeqCst);
            *self.last_data.lock() = Some(data.clone());
            Ok(())
        }

        async fn cancel(&self, data: &HashMap<String, Value>) -> TxResult<()> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            *self.last_data.lock() = Some(data.clone());
            Ok(())
        }
    }

    // =========================================================================
    // INTEGRATION TESTS: TWO-NODE LCN FLOWS
    // =========================================================================

    /// Starter commits: the joiner's held connection is committed on
    /// notification, both contexts retire, no diagnostics recorded.
    #[tokio::test]
    async fn test_two_node_lcn_commit() {
        let cluster = Cluster::new();
        let starter = cluster.node("node-a", fast_config(), true);
        let joiner = cluster.node("node-b", fast_config(), true);

        let ctx_a = starter
            .coordinator
            .begin(PropagationPolicy::Required, TransactionType::Lcn, None, None)
            .await
            .unwrap()
            .unwrap();
        let conn_a = starter
            .coordinator
            .held_connection(&ctx_a, "orders")
            .await
            .unwrap();
        conn_a
            .execute(&StatementOp::Insert {
                table: "orders".into(),
                row: row(&[("id", json!(1))]),
            })
            .await
            .unwrap();

        // RPC to node-b carries the group headers.
        let headers = starter.coordinator.router().outbound_headers(&ctx_a);
        let ctx_b = joiner
            .coordinator
            .begin(
                PropagationPolicy::Required,
                TransactionType::Lcn,
                None,
                Some(&headers),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ctx_b.state, PropagationState::JoinOtherNode);
        assert_eq!(ctx_b.group_id, ctx_a.group_id);

        let conn_b = joiner
            .coordinator
            .held_connection(&ctx_b, "stock")
            .await
            .unwrap();
        conn_b
            .execute(&StatementOp::Insert {
                table: "reservations".into(),
                row: row(&[("order_id", json!(1))]),
            })
            .await
            .unwrap();
        joiner.coordinator.succeed(&ctx_b).await.unwrap();

        // Joiner's work is still buffered while the group is open.
        assert!(joiner.pool.source("stock").read_table("reservations").is_empty());

        starter.coordinator.succeed(&ctx_a).await.unwrap();

        assert_eq!(starter.pool.source("orders").read_table("orders").len(), 1);
        assert_eq!(joiner.pool.source("stock").read_table("reservations").len(), 1);
        assert_eq!(joiner.pool.source("stock").commit_count(), 1);
        assert_eq!(starter.coordinator.live_groups(), 0);
        assert_eq!(joiner.coordinator.live_groups(), 0);
        assert!(starter.exceptions.list().await.unwrap().is_empty());
        assert!(joiner.exceptions.list().await.unwrap().is_empty());
        // Aspect logs finalized on both sides.
        assert!(starter
            .aspect_logs
            .get(&ctx_a.group_id, &ctx_a.unit_id)
            .await
            .unwrap()
            .is_none());
        assert!(joiner
            .aspect_logs
            .get(&ctx_b.group_id, &ctx_b.unit_id)
            .await
            .unwrap()
            .is_none());
    }

    /// Starter fails after the joiner already succeeded locally: the
    /// joiner's buffered work is rolled back on notification.
    #[tokio::test]
    async fn test_two_node_lcn_starter_failure_rolls_back_joiner() {
        let cluster = Cluster::new();
        let starter = cluster.node("node-a", fast_config(), true);
        let joiner = cluster.node("node-b", fast_config(), true);

        let ctx_a = starter
            .coordinator
            .begin(PropagationPolicy::Required, TransactionType::Lcn, None, None)
            .await
            .unwrap()
            .unwrap();
        let headers = starter.coordinator.router().outbound_headers(&ctx_a);

        let ctx_b = joiner
            .coordinator
            .begin(
                PropagationPolicy::Required,
                TransactionType::Lcn,
                None,
                Some(&headers),
            )
            .await
            .unwrap()
            .unwrap();
        let conn_b = joiner
            .coordinator
            .held_connection(&ctx_b, "stock")
            .await
            .unwrap();
        conn_b
            .execute(&StatementOp::Insert {
                table: "reservations".into(),
                row: row(&[("order_id", json!(1))]),
            })
            .await
            .unwrap();
        joiner.coordinator.succeed(&ctx_b).await.unwrap();

        // Starter's business code fails after the remote call returned.
        starter.coordinator.fail(&ctx_a).await.unwrap();

        assert!(joiner.pool.source("stock").read_table("reservations").is_empty());
        assert_eq!(joiner.pool.source("stock").rollback_count(), 1);
        assert_eq!(starter.coordinator.live_groups(), 0);
        assert_eq!(joiner.coordinator.live_groups(), 0);
        // The starter remains the authority for the rollback outcome.
        assert_eq!(
            starter
                .coordinator
                .handle_ask_state(&ctx_a.group_id, &ctx_a.unit_id)
                .await
                .unwrap(),
            TransactionOutcome::Rollback
        );
    }

    /// A joiner that fails locally rolls back at once instead of waiting
    /// for the group outcome.
    #[tokio::test]
    async fn test_joiner_local_failure_rolls_back_immediately() {
        let cluster = Cluster::new();
        let starter = cluster.node("node-a", fast_config(), true);
        let joiner = cluster.node("node-b", fast_config(), true);

        let ctx_a = starter
            .coordinator
            .begin(PropagationPolicy::Required, TransactionType::Lcn, None, None)
            .await
            .unwrap()
            .unwrap();
        let headers = starter.coordinator.router().outbound_headers(&ctx_a);

        let ctx_b = joiner
            .coordinator
            .begin(
                PropagationPolicy::Required,
                TransactionType::Lcn,
                None,
                Some(&headers),
            )
            .await
            .unwrap()
            .unwrap();
        let conn_b = joiner
            .coordinator
            .held_connection(&ctx_b, "stock")
            .await
            .unwrap();
        conn_b
            .execute(&StatementOp::Insert {
                table: "reservations".into(),
                row: row(&[("order_id", json!(1))]),
            })
            .await
            .unwrap();

        joiner.coordinator.fail(&ctx_b).await.unwrap();
        assert_eq!(joiner.pool.source("stock").rollback_count(), 1);
        assert_eq!(joiner.coordinator.live_groups(), 0);

        // Starter propagates the business error and rolls the group back.
        starter.coordinator.fail(&ctx_a).await.unwrap();
        assert_eq!(starter.coordinator.live_groups(), 0);
    }

    // =========================================================================
    // INTEGRATION TESTS: TCC AND TXC ACROSS NODES
    // =========================================================================

    /// TCC joiner: confirm runs on commit with the Try phase's
    /// compensation data; cancel never runs.
    #[tokio::test]
    async fn test_two_node_tcc_confirm_on_commit() {
        let cluster = Cluster::new();
        let starter = cluster.node("node-a", fast_config(), true);
        let joiner = cluster.node("node-b", fast_config(), true);

        let ctx_a = starter
            .coordinator
            .begin(PropagationPolicy::Required, TransactionType::Lcn, None, None)
            .await
            .unwrap()
            .unwrap();
        let headers = starter.coordinator.router().outbound_headers(&ctx_a);

        let ctx_b = joiner
            .coordinator
            .begin(
                PropagationPolicy::Required,
                TransactionType::Tcc,
                None,
                Some(&headers),
            )
            .await
            .unwrap()
            .unwrap();
        let executor = RecordingExecutor::new();
        let binding = joiner
            .coordinator
            .bind_tcc(&ctx_b, executor.clone())
            .unwrap();
        binding.put("reserved_id", json!(42));
        joiner.coordinator.succeed(&ctx_b).await.unwrap();

        starter.coordinator.succeed(&ctx_a).await.unwrap();

        assert_eq!(executor.confirms.load(Ordering::SeqCst), 1);
        assert_eq!(executor.cancels.load(Ordering::SeqCst), 0);
        let data = executor.last_data.lock().clone().unwrap();
        assert_eq!(data.get("reserved_id"), Some(&json!(42)));
    }

    /// TCC joiner: the starter's failure drives cancel with the same
    /// compensation data the Try phase recorded.
    #[tokio::test]
    async fn test_two_node_tcc_cancel_on_rollback() {
        let cluster = Cluster::new();
        let starter = cluster.node("node-a", fast_config(), true);
        let joiner = cluster.node("node-b", fast_config(), true);

        let ctx_a = starter
            .coordinator
            .begin(PropagationPolicy::Required, TransactionType::Lcn, None, None)
            .await
            .unwrap()
            .unwrap();
        let headers = starter.coordinator.router().outbound_headers(&ctx_a);

        let ctx_b = joiner
            .coordinator
            .begin(
                PropagationPolicy::Required,
                TransactionType::Tcc,
                None,
                Some(&headers),
            )
            .await
            .unwrap()
            .unwrap();
        let executor = RecordingExecutor::new();
        let binding = joiner
            .coordinator
            .bind_tcc(&ctx_b, executor.clone())
            .unwrap();
        binding.put("reserved_id", json!(7));
        joiner.coordinator.succeed(&ctx_b).await.unwrap();

        starter.coordinator.fail(&ctx_a).await.unwrap();

        assert_eq!(executor.cancels.load(Ordering::SeqCst), 1);
        assert_eq!(executor.confirms.load(Ordering::SeqCst), 0);
        let data = executor.last_data.lock().clone().unwrap();
        assert_eq!(data.get("reserved_id"), Some(&json!(7)));
    }

    /// TXC joiner: before-images captured through the interception hooks
    /// are replayed on rollback, restoring the pre-statement rows, and
    /// the undo log is emptied afterwards.
    #[tokio::test]
    async fn test_two_node_txc_rollback_replays_undo_log() {
        let cluster = Cluster::new();
        let starter = cluster.node("node-a", fast_config(), true);
        let joiner = cluster.node("node-b", fast_config(), true);

        let before = row(&[("id", json!(1)), ("balance", json!(100))]);
        joiner
            .pool
            .source("accounts")
            .seed_table("balances", vec![before.clone()]);

        let ctx_a = starter
            .coordinator
            .begin(PropagationPolicy::Required, TransactionType::Lcn, None, None)
            .await
            .unwrap()
            .unwrap();
        let headers = starter.coordinator.router().outbound_headers(&ctx_a);

        let ctx_b = joiner
            .coordinator
            .begin(
                PropagationPolicy::Required,
                TransactionType::Txc,
                None,
                Some(&headers),
            )
            .await
            .unwrap()
            .unwrap();

        // Interception captures the before-image, then the statement runs
        // on an ordinary auto-commit connection.
        joiner
            .coordinator
            .before_statement(
                &ctx_b,
                StatementCapture {
                    datasource: "accounts".into(),
                    table: "balances".into(),
                    kind: StatementKind::Update,
                    key_columns: vec!["id".into()],
                    before_rows: vec![before.clone()],
                },
            )
            .await
            .unwrap();
        let conn = joiner.pool.connection("accounts", true).await.unwrap();
        conn.execute(&StatementOp::UpdateByKey {
            table: "balances".into(),
            key: row(&[("id", json!(1))]),
            values: row(&[("id", json!(1)), ("balance", json!(25))]),
        })
        .await
        .unwrap();
        joiner.coordinator.succeed(&ctx_b).await.unwrap();

        starter.coordinator.fail(&ctx_a).await.unwrap();

        let restored = joiner.pool.source("accounts").read_table("balances");
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].get("balance"), Some(&json!(100)));
        assert!(joiner
            .undo_logs
            .fetch(&ctx_b.group_id, &ctx_b.unit_id)
            .await
            .unwrap()
            .is_empty());
    }

    // =========================================================================
    // INTEGRATION TESTS: AFFINITY PROPAGATION
    // =========================================================================

    /// The joiner inherits the starter's instance choices through the
    /// group headers and routes to them without consulting its own
    /// balancer.
    #[tokio::test]
    async fn test_affinity_propagates_through_headers() {
        let cluster = Cluster::new();
        let starter = cluster.node("node-a", fast_config(), true);
        let joiner = cluster.node("node-b", fast_config(), true);

        let ctx_a = starter
            .coordinator
            .begin(PropagationPolicy::Required, TransactionType::Lcn, None, None)
            .await
            .unwrap()
            .unwrap();
        let instances = vec!["10.0.0.1:80".to_string(), "10.0.0.2:80".to_string()];
        let chosen = starter
            .coordinator
            .router()
            .select(Some(&ctx_a), "billing", &instances)
            .await
            .unwrap();

        let headers = starter.coordinator.router().outbound_headers(&ctx_a);
        assert_eq!(headers.affinity.get("billing"), Some(&chosen));

        let ctx_b = joiner
            .coordinator
            .begin(
                PropagationPolicy::Required,
                TransactionType::Lcn,
                None,
                Some(&headers),
            )
            .await
            .unwrap()
            .unwrap();

        // The joiner routes "billing" to the inherited address, even with
        // a different instance list in hand.
        let routed = joiner
            .coordinator
            .router()
            .select(Some(&ctx_b), "billing", &["10.0.0.9:80".to_string()])
            .await
            .unwrap();
        assert_eq!(routed, chosen);

        joiner.coordinator.succeed(&ctx_b).await.unwrap();
        starter.coordinator.succeed(&ctx_a).await.unwrap();
    }
}
