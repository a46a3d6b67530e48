//! Least Connections load balancing strategy.

use std::sync::{Arc, Mutex};
use crate::config::Algorithm;
use crate::load_balancer::{LoadBalancer, backend::Backend};

/// Least connections selector.
/// Selects the backend with the minimum number of active connections and
/// counts the new connection against it.
#[derive(Debug, Default)]
pub struct LeastConnections {
    /// Serializes the scan-then-increment for this pool.
    pick: Mutex<()>,
}

impl LeastConnections {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for LeastConnections {
    fn next_server(&self, backends: &[Arc<Backend>], _session: Option<&str>) -> Option<Arc<Backend>> {
        let _pick = self.pick.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        // In case of tie, the first one is selected (stability)
        let backend = backends
            .iter()
            .min_by_key(|b| b.active_connections())?;
        backend.inc_connections();
        Some(backend.clone())
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::Availability
    }
}
