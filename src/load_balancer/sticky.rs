//! Sticky-session load balancing strategy.
//!
//! A session key, once bound to a backend, keeps mapping to it for the
//! lifetime of the pool. New keys go to the backend holding the fewest
//! sessions. Calls without a key fall back to a random pick and bind nothing.

use std::sync::{Arc, Mutex};
use crate::config::Algorithm;
use crate::load_balancer::{LoadBalancer, backend::Backend, random::Random};

/// Session-affinity selector.
#[derive(Debug, Default)]
pub struct StickySession {
    /// Serializes lookup-then-assign for this pool.
    assign: Mutex<()>,
    fallback: Random,
}

impl StickySession {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for StickySession {
    fn next_server(&self, backends: &[Arc<Backend>], session: Option<&str>) -> Option<Arc<Backend>> {
        let Some(key) = session else {
            return self.fallback.next_server(backends, None);
        };

        let _assign = self.assign.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(bound) = backends.iter().find(|b| b.has_session(key)) {
            return Some(bound.clone());
        }

        let backend = backends.iter().min_by_key(|b| b.session_count())?;
        backend.assign_session(key);
        tracing::debug!(backend = %backend.authority(), "Bound new session");
        Some(backend.clone())
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::Session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerAddr;

    fn pool(n: u16) -> Vec<Arc<Backend>> {
        (0..n)
            .map(|i| Arc::new(Backend::new(ServerAddr::new("127.0.0.1", 7000 + i))))
            .collect()
    }

    #[test]
    fn test_same_key_same_backend() {
        let lb = StickySession::new();
        let backends = pool(3);

        let first = lb.next_server(&backends, Some("alice")).unwrap();
        for other in ["bob", "carol", "dave", "erin"] {
            lb.next_server(&backends, Some(other)).unwrap();
        }
        for _ in 0..5 {
            let again = lb.next_server(&backends, Some("alice")).unwrap();
            assert_eq!(again.addr, first.addr);
        }
        assert_eq!(first.addr.port, 7000);
    }

    #[test]
    fn test_new_keys_fill_least_loaded() {
        let lb = StickySession::new();
        let backends = pool(2);

        let ports: Vec<u16> = ["a", "b", "c", "d"]
            .iter()
            .map(|k| lb.next_server(&backends, Some(k)).unwrap().addr.port)
            .collect();
        assert_eq!(ports, vec![7000, 7001, 7000, 7001]);
        assert_eq!(backends[0].session_count(), 2);
        assert_eq!(backends[1].session_count(), 2);
    }

    #[test]
    fn test_missing_key_binds_nothing() {
        let lb = StickySession::new();
        let backends = pool(2);

        for _ in 0..10 {
            assert!(lb.next_server(&backends, None).is_some());
        }
        assert!(backends.iter().all(|b| b.session_count() == 0));
    }
}
