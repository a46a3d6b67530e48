//! Backend abstraction.
//!
//! # Responsibilities
//! - Represent a single backend server
//! - Track active connections (for least-active-connections)
//! - Track sessions bound to this backend (for sticky sessions)
//!
//! Backend state is created fresh for every config snapshot; nothing on a
//! `Backend` survives a reload.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::config::ServerAddr;

/// A single backend server plus its selection bookkeeping.
#[derive(Debug)]
pub struct Backend {
    /// The configured address of the backend.
    pub addr: ServerAddr,
    /// Pre-formatted `host:port` used for URIs and labels.
    authority: String,
    /// Number of in-flight requests routed here (least-active-connections).
    active_connections: AtomicUsize,
    /// Session keys bound to this backend (sticky-session).
    sessions: Mutex<HashSet<String>>,
}

impl Backend {
    /// Create a new backend.
    pub fn new(addr: ServerAddr) -> Self {
        let authority = addr.to_string();
        Self {
            addr,
            authority,
            active_connections: AtomicUsize::new(0),
            sessions: Mutex::new(HashSet::new()),
        }
    }

    /// `host:port` of this backend.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Get the current number of active connections.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Increment active connection count.
    pub fn inc_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement active connection count. Never goes below zero.
    pub fn dec_connections(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Number of session keys bound to this backend.
    pub fn session_count(&self) -> usize {
        self.sessions().len()
    }

    /// Whether `key` is bound to this backend.
    pub fn has_session(&self, key: &str) -> bool {
        self.sessions().contains(key)
    }

    /// Bind `key` to this backend.
    pub fn assign_session(&self, key: &str) {
        self.sessions().insert(key.to_string());
    }

    fn sessions(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
