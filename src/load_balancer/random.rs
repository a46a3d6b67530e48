//! Uniform random load balancing strategy.

use std::sync::Arc;
use rand::Rng;
use crate::config::Algorithm;
use crate::load_balancer::{LoadBalancer, backend::Backend};

/// Random selector. Stateless.
#[derive(Debug, Default)]
pub struct Random;

impl Random {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for Random {
    fn next_server(&self, backends: &[Arc<Backend>], _session: Option<&str>) -> Option<Arc<Backend>> {
        if backends.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..backends.len());
        Some(backends[index].clone())
    }

    fn algorithm(&self) -> Algorithm {
        Algorithm::Random
    }
}
