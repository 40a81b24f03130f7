//! # Transaction Coordinator
//!
//! Service facade wiring the resolver, context store, strategies,
//! checker, clearance pipeline, and affinity router together for one
//! node. Also implements the node's inbound surfaces: the remote command
//! handler plugged into the messaging substrate and the SQL interception
//! hooks invoked by the statement layer.

use crate::checker::DelayedChecker;
use crate::clearance::ClearancePipeline;
use crate::config::TxConfig;
use crate::context::GroupContextStore;
use crate::domain::{
    AspectLog, BranchDescriptor, GroupId, PropagationPolicy, PropagationState, Row,
    StatementCapture, TransactionOutcome, TransactionType, TxContext, TxError, TxHeaders,
    TxResult, UnitId,
};
use crate::ports::inbound::{RemoteCommandHandler, SqlInterception, TccExecutor};
use crate::ports::outbound::{
    AspectLogStore, DataSourcePool, LoadBalancer, MessageBus, SharedCache, TxConnection,
    TxExceptionStore, UndoLogStore,
};
use crate::propagation;
use crate::routing::AffinityRouter;
use crate::strategy::{LcnStrategy, StrategyRegistry, TccBinding, TccStrategy, TxcStrategy};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// External collaborators a coordinator is wired against.
pub struct CoordinatorDeps {
    /// Cluster messaging substrate.
    pub bus: Arc<dyn MessageBus>,
    /// Shared cluster cache.
    pub cache: Arc<dyn SharedCache>,
    /// Durable aspect log table.
    pub aspect_logs: Arc<dyn AspectLogStore>,
    /// Durable undo log table.
    pub undo_logs: Arc<dyn UndoLogStore>,
    /// Diagnostic record store.
    pub exceptions: Arc<dyn TxExceptionStore>,
    /// Connection pool over the node's datasources.
    pub pool: Arc<dyn DataSourcePool>,
    /// Default outbound load balancer.
    pub balancer: Arc<dyn LoadBalancer>,
}

fn outcome_cache_key(group: &GroupId) -> String {
    format!("tx:outcome:{group}")
}

/// Per-node coordination core.
pub struct TransactionCoordinator {
    node_id: String,
    config: TxConfig,
    contexts: Arc<GroupContextStore>,
    registry: Arc<StrategyRegistry>,
    lcn: Arc<LcnStrategy>,
    tcc: Arc<TccStrategy>,
    txc: Arc<TxcStrategy>,
    pipeline: Arc<ClearancePipeline>,
    checker: DelayedChecker,
    bus: Arc<dyn MessageBus>,
    cache: Arc<dyn SharedCache>,
    aspect_logs: Arc<dyn AspectLogStore>,
    router: AffinityRouter,
    /// Authoritative outcomes of groups this node started.
    outcomes: RwLock<HashMap<GroupId, TransactionOutcome>>,
}

impl TransactionCoordinator {
    /// Build a coordinator. The strategy registry and the watchdog task
    /// registry are constructed here, once, and live as long as the
    /// coordinator.
    pub fn new(node_id: &str, config: TxConfig, deps: CoordinatorDeps) -> Arc<Self> {
        let contexts = Arc::new(GroupContextStore::new());
        let lcn = Arc::new(LcnStrategy::new(Arc::clone(&contexts), Arc::clone(&deps.pool)));
        let tcc = Arc::new(TccStrategy::new(Arc::clone(&contexts)));
        let txc = Arc::new(TxcStrategy::new(
            Arc::clone(&deps.undo_logs),
            Arc::clone(&deps.pool),
        ));
        let registry = Arc::new(StrategyRegistry::new(
            Arc::clone(&lcn),
            Arc::clone(&tcc),
            Arc::clone(&txc),
        ));
        let pipeline = Arc::new(ClearancePipeline::new(
            Arc::clone(&contexts),
            Arc::clone(&registry),
            Arc::clone(&deps.aspect_logs),
            Arc::clone(&deps.exceptions),
        ));
        let checker = DelayedChecker::new(
            config.clone(),
            Arc::clone(&contexts),
            Arc::clone(&deps.bus),
            Arc::clone(&pipeline),
        );
        let router = AffinityRouter::new(Arc::clone(&contexts), deps.balancer);

        Arc::new(Self {
            node_id: node_id.to_string(),
            config,
            contexts,
            registry,
            lcn,
            tcc,
            txc,
            pipeline,
            checker,
            bus: deps.bus,
            cache: deps.cache,
            aspect_logs: deps.aspect_logs,
            router,
            outcomes: RwLock::new(HashMap::new()),
        })
    }

    /// This node's identifier.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// The affinity-aware outbound router.
    pub fn router(&self) -> &AffinityRouter {
        &self.router
    }

    /// Live group contexts on this node (observability and tests).
    pub fn live_groups(&self) -> usize {
        self.contexts.len()
    }

    /// Enter a transactional boundary. Returns `None` when the resolved
    /// propagation state is to run without a distributed transaction.
    ///
    /// `parent` is the caller's context when this call chain is already
    /// inside a group on this node; `headers` carry an inbound group id
    /// propagated by a remote caller.
    pub async fn begin(
        &self,
        policy: PropagationPolicy,
        tx_type: TransactionType,
        parent: Option<&TxContext>,
        headers: Option<&TxHeaders>,
    ) -> TxResult<Option<TxContext>> {
        let state = propagation::resolve(policy, parent.is_some(), headers.is_some())?;
        match state {
            PropagationState::None => {
                debug!(?policy, "running outside any transaction group");
                Ok(None)
            }
            PropagationState::Create => {
                let group_id = GroupId::mint();
                self.contexts.create(group_id.clone(), true);
                let ctx = TxContext {
                    group_id,
                    unit_id: UnitId::mint(),
                    tx_type,
                    state,
                    is_starter: true,
                };
                info!(group = %ctx.group_id, unit = %ctx.unit_id, %tx_type, "group created");
                self.activate(&ctx, policy).await?;
                Ok(Some(ctx))
            }
            PropagationState::JoinLocalNode => {
                let Some(parent) = parent else {
                    return Err(TxError::PropagationViolation {
                        policy,
                        reason: "local join without a parent context",
                    });
                };
                let context = self
                    .contexts
                    .get(&parent.group_id)
                    .ok_or_else(|| TxError::GroupNotFound(parent.group_id.clone()))?;
                let ctx = TxContext {
                    group_id: parent.group_id.clone(),
                    unit_id: UnitId::mint(),
                    tx_type,
                    state,
                    is_starter: context.is_starter(),
                };
                debug!(group = %ctx.group_id, unit = %ctx.unit_id, "joined locally");
                self.activate(&ctx, policy).await?;
                Ok(Some(ctx))
            }
            PropagationState::JoinOtherNode => {
                let Some(headers) = headers else {
                    return Err(TxError::PropagationViolation {
                        policy,
                        reason: "remote join without inbound headers",
                    });
                };
                let group_id = GroupId(headers.group_id.clone());
                let context = self.contexts.create(group_id.clone(), false);
                context.merge_affinity(&headers.affinity);
                let ctx = TxContext {
                    group_id,
                    unit_id: UnitId::mint(),
                    tx_type,
                    state,
                    is_starter: false,
                };
                info!(group = %ctx.group_id, unit = %ctx.unit_id, %tx_type, "joined group");
                self.activate(&ctx, policy).await?;
                Ok(Some(ctx))
            }
        }
    }

    /// Record the branch, arm its watchdog, and run the start hook.
    async fn activate(&self, ctx: &TxContext, policy: PropagationPolicy) -> TxResult<()> {
        let context = self
            .contexts
            .get(&ctx.group_id)
            .ok_or_else(|| TxError::GroupNotFound(ctx.group_id.clone()))?;
        context.register_unit(ctx.unit_id.clone(), ctx.tx_type);

        self.aspect_logs
            .append(AspectLog::record(
                ctx.group_id.clone(),
                ctx.unit_id.clone(),
                BranchDescriptor {
                    node_id: self.node_id.clone(),
                    tx_type: ctx.tx_type,
                    state: ctx.state,
                    policy,
                },
            ))
            .await?;

        self.checker
            .start_delay_checking(&ctx.group_id, &ctx.unit_id, ctx.tx_type);
        self.registry.get(ctx.tx_type)?.on_business_start(ctx).await
    }

    /// Business code returned successfully.
    pub async fn succeed(&self, ctx: &TxContext) -> TxResult<()> {
        self.complete(ctx, true).await
    }

    /// Business code failed. Always drives the error path of the bound
    /// strategy, whatever the business error was.
    pub async fn fail(&self, ctx: &TxContext) -> TxResult<()> {
        self.complete(ctx, false).await
    }

    async fn complete(&self, ctx: &TxContext, success: bool) -> TxResult<()> {
        let strategy = self.registry.get(ctx.tx_type)?;
        match ctx.state {
            PropagationState::None => Ok(()),
            PropagationState::JoinLocalNode => {
                // The outermost boundary finishes the group; nested units
                // only run their hooks (reentrancy rules apply inside).
                if success {
                    strategy.on_business_success(ctx).await
                } else {
                    strategy.on_business_error(ctx).await
                }
            }
            PropagationState::Create => {
                if success {
                    strategy.on_business_success(ctx).await?;
                } else {
                    strategy.on_business_error(ctx).await?;
                }
                let outcome = if success {
                    TransactionOutcome::Commit
                } else {
                    TransactionOutcome::Rollback
                };
                self.finish_group_as_starter(&ctx.group_id, outcome).await
            }
            PropagationState::JoinOtherNode => {
                if success {
                    strategy.on_business_success(ctx).await?;
                    if let Some(context) = self.contexts.get(&ctx.group_id) {
                        context.mark_complete();
                    }
                    // Outcome arrives via notify-unit or the watchdog;
                    // both stay armed.
                    debug!(group = %ctx.group_id, unit = %ctx.unit_id, "joiner awaiting outcome");
                    Ok(())
                } else {
                    strategy.on_business_error(ctx).await?;
                    // Local failure: clear immediately rather than
                    // waiting for a notification that reports what this
                    // node already knows.
                    self.clear_local_branches(&ctx.group_id, TransactionOutcome::Rollback)
                        .await
                }
            }
        }
    }

    /// Starter-side group finish: record the authoritative outcome,
    /// clear local branches, and broadcast the outcome to the joiners.
    async fn finish_group_as_starter(
        &self,
        group: &GroupId,
        outcome: TransactionOutcome,
    ) -> TxResult<()> {
        self.outcomes.write().insert(group.clone(), outcome);
        if let Err(err) = self
            .cache
            .put(
                &outcome_cache_key(group),
                serde_json::to_value(outcome).unwrap_or_default(),
            )
            .await
        {
            warn!(group = %group, error = %err, "outcome cache write failed");
        }

        self.clear_local_branches(group, outcome).await?;

        if let Err(err) = self.bus.notify_group(group, outcome).await {
            // Joiners fall back to their watchdogs asking us.
            warn!(group = %group, error = %err, "group notification failed");
        }
        info!(group = %group, %outcome, "group finished");
        Ok(())
    }

    /// Cancel watchdogs and clear every branch of the group recorded on
    /// this node, then retire the context.
    async fn clear_local_branches(
        &self,
        group: &GroupId,
        outcome: TransactionOutcome,
    ) -> TxResult<()> {
        let Some(context) = self.contexts.get(group) else {
            debug!(group = %group, "no local branches to clear");
            return Ok(());
        };
        context.mark_complete();
        for unit in context.units() {
            self.checker.stop_delay_checking(group, &unit.unit_id);
            self.pipeline
                .clear_branch(group, &unit.unit_id, unit.tx_type, outcome, true)
                .await?;
        }
        self.pipeline.retire_group(group).await;
        Ok(())
    }

    /// Acquire (or reuse) the LCN held resource for a datasource.
    pub async fn held_connection(
        &self,
        ctx: &TxContext,
        datasource: &str,
    ) -> TxResult<Arc<dyn TxConnection>> {
        let held = self.lcn.acquire(ctx, datasource).await?;
        Ok(Arc::clone(&held.connection))
    }

    /// Bind TCC confirm/cancel references for the current branch.
    pub fn bind_tcc(
        &self,
        ctx: &TxContext,
        executor: Arc<dyn TccExecutor>,
    ) -> TxResult<Arc<TccBinding>> {
        self.tcc.bind(ctx, executor)
    }

    /// Drain the watchdog registry with the configured grace period.
    pub async fn shutdown(&self) {
        self.checker.shutdown().await;
    }

    #[cfg(test)]
    pub(crate) fn checker(&self) -> &DelayedChecker {
        &self.checker
    }
}

#[async_trait]
impl RemoteCommandHandler for TransactionCoordinator {
    async fn handle_notify_unit(
        &self,
        group: &GroupId,
        outcome: TransactionOutcome,
    ) -> TxResult<()> {
        let Some(context) = self.contexts.get(group) else {
            // At-least-once delivery: the branches were already cleared.
            debug!(group = %group, %outcome, "notify for unknown group ignored");
            return Ok(());
        };

        // Never race ahead of still-running local business code.
        if !context.is_starter() && !context.wait_complete(self.config.signal_wait).await {
            warn!(group = %group, "business code still running at notify, clearing anyway");
        }

        self.clear_local_branches(group, outcome).await
    }

    async fn handle_ask_state(
        &self,
        group: &GroupId,
        unit: &UnitId,
    ) -> TxResult<TransactionOutcome> {
        if let Some(outcome) = self.outcomes.read().get(group) {
            debug!(group = %group, unit = %unit, %outcome, "answered from outcome table");
            return Ok(*outcome);
        }
        if let Ok(Some(value)) = self.cache.get(&outcome_cache_key(group)).await {
            if let Ok(outcome) = serde_json::from_value::<TransactionOutcome>(value) {
                debug!(group = %group, unit = %unit, %outcome, "answered from shared cache");
                return Ok(outcome);
            }
        }
        Err(TxError::OutcomeUnknown(group.clone()))
    }

    async fn handle_get_aspect_log(&self, group: &GroupId, unit: &UnitId) -> TxResult<AspectLog> {
        self.pipeline.fetch_aspect_log(group, unit).await
    }
}

#[async_trait]
impl SqlInterception for TransactionCoordinator {
    async fn before_statement(&self, ctx: &TxContext, capture: StatementCapture) -> TxResult<()> {
        if ctx.tx_type != TransactionType::Txc || !ctx.state.in_group() {
            return Ok(());
        }
        self.txc.before_statement(ctx, capture).await
    }

    async fn after_statement(
        &self,
        ctx: &TxContext,
        capture: StatementCapture,
        generated_keys: Vec<Row>,
    ) -> TxResult<()> {
        if ctx.tx_type != TransactionType::Txc || !ctx.state.in_group() {
            return Ok(());
        }
        self.txc.after_statement(ctx, capture, generated_keys).await
    }
}
