//! Backend pool management.
//!
//! # Responsibilities
//! - Hold the ordered backends of one role
//! - Apply the configured load balancing algorithm to select a backend
//! - Hand out selection guards that release bookkeeping exactly once

use std::ops::Deref;
use std::sync::Arc;

use crate::config::{Algorithm, ServerAddr};
use crate::load_balancer::{
    backend::Backend, least_conn::LeastConnections, random::Random, round_robin::RoundRobin,
    sticky::StickySession, LoadBalancer, Role,
};
use crate::observability::metrics;

/// An ordered set of backends for one role, with its selection state.
#[derive(Debug)]
pub struct Pool {
    role: Role,
    backends: Vec<Arc<Backend>>,
    balancer: Box<dyn LoadBalancer>,
}

impl Pool {
    /// Create a pool with fresh backend state.
    pub fn new(role: Role, servers: &[ServerAddr], algorithm: Algorithm) -> Self {
        let backends = servers
            .iter()
            .cloned()
            .map(|addr| Arc::new(Backend::new(addr)))
            .collect();

        let balancer: Box<dyn LoadBalancer> = match algorithm {
            Algorithm::Random => Box::new(Random::new()),
            Algorithm::Robin => Box::new(RoundRobin::new()),
            Algorithm::Session => Box::new(StickySession::new()),
            Algorithm::Availability => Box::new(LeastConnections::new()),
        };

        Self {
            role,
            backends,
            balancer,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn algorithm(&self) -> Algorithm {
        self.balancer.algorithm()
    }

    pub fn backends(&self) -> &[Arc<Backend>] {
        &self.backends
    }

    /// Round-robin cursor, for pools using round-robin.
    pub fn cursor(&self) -> Option<usize> {
        self.balancer.cursor()
    }

    /// Select a backend.
    /// Returns a guard that releases the selection on drop.
    pub fn select(self: &Arc<Self>, session: Option<&str>) -> Option<Selection> {
        let Some(backend) = self.balancer.next_server(&self.backends, session) else {
            tracing::debug!(role = %self.role, backend_count = self.backends.len(), "No backend available in pool");
            return None;
        };

        metrics::record_selection(self.role.as_str(), backend.authority());
        tracing::trace!(
            role = %self.role,
            algorithm = %self.algorithm(),
            backend = %backend.authority(),
            "Backend selected"
        );

        Some(Selection {
            pool: self.clone(),
            backend,
        })
    }

    /// Undo the bookkeeping of one selection.
    ///
    /// Only least-active-connections counts selections, so this is a no-op
    /// for every other algorithm.
    pub fn release(&self, backend: &Backend) {
        if self.algorithm().tracks_connections() {
            backend.dec_connections();
        }
    }
}

/// A RAII guard for one backend selection.
///
/// Dropping it calls [`Pool::release`], so the release happens exactly once
/// whether forwarding succeeds, fails, or the handler is cancelled.
#[derive(Debug)]
pub struct Selection {
    pool: Arc<Pool>,
    backend: Arc<Backend>,
}

impl Selection {
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    pub fn role(&self) -> Role {
        self.pool.role()
    }
}

impl Deref for Selection {
    type Target = Backend;
    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl Drop for Selection {
    fn drop(&mut self) {
        self.pool.release(&self.backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn servers(n: u16) -> Vec<ServerAddr> {
        (0..n).map(|i| ServerAddr::new("127.0.0.1", 6000 + i)).collect()
    }

    #[test]
    fn selection_guard_releases_once() {
        let pool = Arc::new(Pool::new(Role::Write, &servers(2), Algorithm::Availability));

        let a = pool.select(None).unwrap();
        let b = pool.select(None).unwrap();
        assert_eq!(a.addr.port, 6000);
        assert_eq!(b.addr.port, 6001);
        assert_eq!(pool.backends()[0].active_connections(), 1);

        drop(a);
        assert_eq!(pool.backends()[0].active_connections(), 0);
        assert_eq!(pool.backends()[1].active_connections(), 1);

        // the released backend is the least loaded again
        let c = pool.select(None).unwrap();
        assert_eq!(c.addr.port, 6000);
    }

    #[test]
    fn least_conn_follows_minimum_after_unreleased_selections() {
        let pool = Arc::new(Pool::new(Role::Write, &servers(3), Algorithm::Availability));
        let mut held = Vec::new();
        for _ in 0..7 {
            let before: Vec<usize> = pool.backends().iter().map(|b| b.active_connections()).collect();
            let min = *before.iter().min().unwrap();
            let expected = before.iter().position(|c| *c == min).unwrap();

            let selection = pool.select(None).unwrap();
            assert_eq!(selection.addr.port, 6000 + expected as u16);
            held.push(selection);
        }
        drop(held);
        assert!(pool.backends().iter().all(|b| b.active_connections() == 0));
    }

    #[test]
    fn release_is_gated_on_algorithm() {
        let pool = Arc::new(Pool::new(Role::Read, &servers(1), Algorithm::Robin));
        pool.backends()[0].inc_connections();

        drop(pool.select(None).unwrap());
        pool.release(&pool.backends()[0]);
        assert_eq!(pool.backends()[0].active_connections(), 1);
    }

    #[test]
    fn concurrent_least_conn_counters_stay_sane() {
        let pool = Arc::new(Pool::new(Role::Write, &servers(4), Algorithm::Availability));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let selection = pool.select(None).unwrap();
                        assert!(selection.active_connections() >= 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert!(pool.backends().iter().all(|b| b.active_connections() == 0));
    }

    #[test]
    fn empty_pool_selects_nothing() {
        let pool = Arc::new(Pool::new(Role::Read, &[], Algorithm::Random));
        assert!(pool.select(None).is_none());
    }
}
