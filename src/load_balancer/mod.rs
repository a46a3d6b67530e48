//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Path classified → Role identified (read / write)
//!     → registry.rs (current snapshot → pool for role)
//!     → pool.rs (apply the configured algorithm):
//!         - random.rs (uniform pick)
//!         - round_robin.rs (rotate through backends)
//!         - sticky.rs (bind session keys to backends)
//!         - least_conn.rs (pick backend with fewest connections)
//!     → Selection guard (releases bookkeeping on drop)
//! ```
//!
//! # Design Decisions
//! - Selection state lives in the pool, one set per pool, serialized per pool
//! - Reload builds new pools; no counter, cursor or session survives it
//! - The WebSocket pool has one member and never goes through an algorithm

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::config::Algorithm;

pub mod backend;
pub mod least_conn;
pub mod pool;
pub mod random;
pub mod registry;
pub mod round_robin;
pub mod sticky;

pub use backend::Backend;
pub use pool::{Pool, Selection};
pub use registry::{BackendRegistry, ReloadError, Snapshot};

/// A backend selection algorithm.
pub trait LoadBalancer: Send + Sync + fmt::Debug {
    /// Pick a backend. `session` is the sticky-session key, if the request
    /// carried one.
    fn next_server(&self, backends: &[Arc<Backend>], session: Option<&str>) -> Option<Arc<Backend>>;

    /// The configured algorithm this selector implements.
    fn algorithm(&self) -> Algorithm;

    /// Current rotation index, for algorithms that keep one.
    fn cursor(&self) -> Option<usize> {
        None
    }
}

/// The logical role of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Static content.
    Read,
    Write,
    WebSocket,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Read => "read",
            Role::Write => "write",
            Role::WebSocket => "websocket",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
