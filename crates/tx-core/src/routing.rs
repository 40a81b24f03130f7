//! # Transaction-Affinity Routing
//!
//! Outbound instance selection for calls made while inside a group.
//! A service that already has a recorded address for the group is routed
//! there unconditionally, keeping every branch touching the same rows on
//! the same physical connection set; everything else falls through to
//! the default balancer and records the choice for the rest of the group.

use crate::context::GroupContextStore;
use crate::domain::{TxContext, TxHeaders};
use crate::ports::outbound::LoadBalancer;
use std::sync::Arc;
use tracing::debug;

/// Affinity-aware wrapper over the default load balancer.
pub struct AffinityRouter {
    contexts: Arc<GroupContextStore>,
    inner: Arc<dyn LoadBalancer>,
}

impl AffinityRouter {
    /// Wrap the default balancer.
    pub fn new(contexts: Arc<GroupContextStore>, inner: Arc<dyn LoadBalancer>) -> Self {
        Self { contexts, inner }
    }

    /// Pick an instance address for an outbound call. `ctx` is the
    /// caller's transaction context, if the call happens inside a group.
    pub async fn select(
        &self,
        ctx: Option<&TxContext>,
        service_id: &str,
        instances: &[String],
    ) -> Option<String> {
        let context = ctx.and_then(|c| self.contexts.get(&c.group_id));
        if let Some(context) = context {
            if let Some(address) = context.affinity_for(service_id) {
                debug!(
                    group = %context.group_id(),
                    service = service_id,
                    %address,
                    "affinity hit, balancing skipped"
                );
                return Some(address);
            }
            let chosen = self.inner.select(service_id, instances).await?;
            context.record_affinity(service_id, &chosen);
            debug!(
                group = %context.group_id(),
                service = service_id,
                address = %chosen,
                "affinity recorded"
            );
            return Some(chosen);
        }
        self.inner.select(service_id, instances).await
    }

    /// Headers to attach to an outbound RPC made inside a group: the
    /// group id plus the affinity snapshot recorded so far.
    pub fn outbound_headers(&self, ctx: &TxContext) -> TxHeaders {
        let affinity = self
            .contexts
            .get(&ctx.group_id)
            .map(|context| context.affinity_snapshot())
            .unwrap_or_default();
        TxHeaders {
            group_id: ctx.group_id.0.clone(),
            affinity,
        }
    }
}
