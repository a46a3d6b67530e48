//! Round-robin load balancing strategy.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use crate::config::Algorithm;
use crate::load_balancer::{LoadBalancer, backend::Backend};

/// Round-robin selector.
/// Stores the index of the next backend to hand out.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn next_server(&self, backends: &[Arc<Backend>], _session: Option<&str>) -> Option<Arc<Backend>> {
        let len = backends.len();
        if len == 0 {
            return None;
        }

        // The stored cursor is always reduced modulo the pool size, so
        // concurrent callers can only ever observe an in-range index.
        let index = match self.cursor.fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
            Some((c % len + 1) % len)
        }) {
            Ok(prev) | Err(prev) => prev % len,
        };
        Some(backends[index].clone())
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::Robin
    }

    fn cursor(&self) -> Option<usize> {
        Some(self.cursor.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerAddr;

    fn pool(n: u16) -> Vec<Arc<Backend>> {
        (0..n)
            .map(|i| Arc::new(Backend::new(ServerAddr::new("127.0.0.1", 8080 + i))))
            .collect()
    }

    #[test]
    fn test_round_robin() {
        let lb = RoundRobin::new();
        let backends = pool(3);

        for expected in backends.iter().chain(backends.iter().take(1)) {
            let selected = lb.next_server(&backends, None).unwrap();
            assert_eq!(selected.addr, expected.addr);
        }
        assert_eq!(lb.cursor(), Some(1));
    }

    #[test]
    fn test_empty_pool() {
        let lb = RoundRobin::new();
        assert!(lb.next_server(&[], None).is_none());
        assert_eq!(lb.cursor(), Some(0));
    }

    #[test]
    fn test_concurrent_cursor_stays_in_range() {
        let lb = Arc::new(RoundRobin::new());
        let backends = Arc::new(pool(3));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lb = lb.clone();
                let backends = backends.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        assert!(lb.next_server(&backends, None).is_some());
                        assert!(lb.cursor().unwrap() < 3);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        // 8000 selections over 3 backends leaves the cursor at 8000 % 3.
        assert_eq!(lb.cursor(), Some(8000 % 3));
    }
}
