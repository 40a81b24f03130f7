//! # Recovery Flows
//!
//! The messaging substrate is at-least-once and best-effort: group
//! notifications can be lost or duplicated, and the authoritative node
//! can be unreachable. These tests drive the delayed checker through
//! each of those conditions:
//!
//! 1. **Lost notification**: the joiner's watchdog asks for the outcome
//!    and finalizes the branch itself
//! 2. **Ambiguous outcome**: no node answers; the branch is cleaned
//!    conservatively with a diagnostic record and a surviving aspect log
//! 3. **Duplicate notification**: a second delivery is a no-op
//! 4. **Normal completion**: the watchdog never asks at all

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;

    use tx_core::adapters::{
        InMemoryAspectLogStore, InMemoryDataSourcePool, InMemoryMessageBus, InMemorySharedCache,
        InMemoryTxExceptionStore, InMemoryUndoLogStore, RoundRobinBalancer,
    };
    use tx_core::coordinator::{CoordinatorDeps, TransactionCoordinator};
    use tx_core::domain::{
        PropagationPolicy, RegistrarCode, Row, StatementOp, TransactionOutcome, TransactionType,
        TxHeaders,
    };
    use tx_core::ports::inbound::RemoteCommandHandler;
    use tx_core::ports::outbound::{AspectLogStore, TxConnection, TxExceptionStore};
    use tx_core::TxConfig;

    struct Node {
        coordinator: Arc<TransactionCoordinator>,
        pool: Arc<InMemoryDataSourcePool>,
        aspect_logs: Arc<InMemoryAspectLogStore>,
        exceptions: Arc<InMemoryTxExceptionStore>,
    }

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
            let aspect_logs = Arc::new(InMemoryAspectLogStore::new());
            let exceptions = Arc::new(InMemoryTxExceptionStore::new());
            let coordinator = TransactionCoordinator::new(
                node_id,
                config,
                CoordinatorDeps {
                    bus: self.bus.clone(),
                    cache: self.cache.clone(),
                    aspect_logs: aspect_logs.clone(),
                    undo_logs: Arc::new(InMemoryUndoLogStore::new()),
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
                aspect_logs,
                exceptions,
            }
        }
    }

    fn watchdog_config() -> TxConfig {
        TxConfig {
            tx_timeout: Duration::from_millis(100),
            signal_wait: Duration::from_millis(50),
            ask_timeout: Duration::from_millis(200),
            shutdown_grace: Duration::from_millis(500),
        }
    }

    fn row(pairs: &[(&str, serde_json::Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    /// A joiner that never receives the group notification recovers by
    /// asking the starter and finalizing its branch with the answered
    /// outcome.
    #[tokio::test]
    async fn test_lost_notification_recovered_by_watchdog() {
        let cluster = Cluster::new();
        let starter = cluster.node("node-a", watchdog_config(), true);
        // Not registered on the bus: every notification to it is lost.
        let joiner = cluster.node("node-b", watchdog_config(), false);

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

        starter.coordinator.succeed(&ctx_a).await.unwrap();
        // The notification went nowhere; the joiner still holds its work.
        assert!(joiner.pool.source("stock").read_table("reservations").is_empty());

        // Watchdog fires, asks the starter, commits the branch.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(joiner.pool.source("stock").read_table("reservations").len(), 1);
        assert_eq!(joiner.coordinator.live_groups(), 0);
        assert!(joiner.exceptions.list().await.unwrap().is_empty());
        assert!(joiner
            .aspect_logs
            .get(&ctx_b.group_id, &ctx_b.unit_id)
            .await
            .unwrap()
            .is_none());
    }

    /// No node can answer for the group: the watchdog records the ask
    /// failure, rolls the branch back conservatively, and keeps the
    /// aspect log around for diagnosis.
    #[tokio::test]
    async fn test_ambiguous_outcome_cleans_conservatively() {
        let cluster = Cluster::new();
        let joiner = cluster.node("node-b", watchdog_config(), true);

        // Headers from a starter that will never answer.
        let headers = TxHeaders {
            group_id: "g-orphan".into(),
            affinity: HashMap::new(),
        };
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

        tokio::time::sleep(Duration::from_millis(600)).await;

        // Conservative rollback, diagnostic record, surviving aspect log.
        assert!(joiner.pool.source("stock").read_table("reservations").is_empty());
        assert_eq!(joiner.pool.source("stock").rollback_count(), 1);
        let records = joiner.exceptions.list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].registrar, RegistrarCode::AskError);
        assert_eq!(records[0].state, TransactionOutcome::Rollback);
        assert!(joiner
            .aspect_logs
            .get(&ctx_b.group_id, &ctx_b.unit_id)
            .await
            .unwrap()
            .is_some());
        assert_eq!(joiner.coordinator.live_groups(), 0);
    }

    /// At-least-once delivery: replaying the group notification after
    /// the branch was cleared is harmless.
    #[tokio::test]
    async fn test_duplicate_notification_is_idempotent() {
        let cluster = Cluster::new();
        let starter = cluster.node("node-a", watchdog_config(), true);
        let joiner = cluster.node("node-b", watchdog_config(), true);

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
        starter.coordinator.succeed(&ctx_a).await.unwrap();
        assert_eq!(joiner.pool.source("stock").commit_count(), 1);

        // Redelivery after clearance.
        joiner
            .coordinator
            .handle_notify_unit(&ctx_b.group_id, TransactionOutcome::Commit)
            .await
            .unwrap();
        assert_eq!(joiner.pool.source("stock").commit_count(), 1);
        assert!(joiner.exceptions.list().await.unwrap().is_empty());
    }

    /// Normal completion cancels the watchdog before it ever asks.
    #[tokio::test]
    async fn test_normal_completion_cancels_watchdog() {
        let cluster = Cluster::new();
        let starter = cluster.node("node-a", watchdog_config(), true);
        let joiner = cluster.node("node-b", watchdog_config(), true);

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
        joiner.coordinator.succeed(&ctx_b).await.unwrap();
        starter.coordinator.succeed(&ctx_a).await.unwrap();

        // Well past every watchdog delay.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(cluster.bus.ask_count(), 0);

        starter.coordinator.shutdown().await;
        joiner.coordinator.shutdown().await;
    }
}
