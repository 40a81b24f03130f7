//! Default round-robin load balancer.

use crate::ports::outbound::LoadBalancer;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Rotates through the instance list per call.
#[derive(Default)]
pub struct RoundRobinBalancer {
    cursor: AtomicUsize,
}

impl RoundRobinBalancer {
    /// Create a balancer starting at the first instance.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LoadBalancer for RoundRobinBalancer {
    async fn select(&self, _service_id: &str, instances: &[String]) -> Option<String> {
        if instances.is_empty() {
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % instances.len();
        instances.get(idx).cloned()
    }
}
