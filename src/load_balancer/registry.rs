//! Backend pool registry.
//!
//! # Responsibilities
//! - Own the current configuration snapshot (pools, algorithm, rules)
//! - Serve pools by role
//! - Replace the snapshot on reload, failing closed on bad configuration
//!
//! # Design Decisions
//! - The snapshot is immutable and swapped through a single `ArcSwap`
//! - Readers hold an `Arc<Snapshot>` for the whole request, so a reload
//!   mid-request never mixes old and new pools
//! - A failed reload leaves the previous snapshot serving traffic

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use thiserror::Error;

use crate::config::validation::{validate_config, ValidationError};
use crate::config::{load_config, ConfigError, FortitudeConfig};
use crate::load_balancer::{Backend, Pool, Role};
use crate::observability::metrics;
use crate::routing::PathClassifier;

/// Errors from a reload trigger.
#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("no configuration file is associated with this registry")]
    NoSource,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// An immutable, point-in-time view of the configuration and its pools.
#[derive(Debug)]
pub struct Snapshot {
    pub config: FortitudeConfig,
    pub classifier: PathClassifier,
    /// Incremented by every successful reload.
    pub generation: u64,
    read: Arc<Pool>,
    write: Arc<Pool>,
    websocket: Arc<Pool>,
}

impl Snapshot {
    /// Validate `config` and build fresh pools from it.
    pub fn build(config: FortitudeConfig, generation: u64) -> Result<Self, ConfigError> {
        validate_config(&config).map_err(ConfigError::Validation)?;

        let classifier = PathClassifier::from_rules(&config.read_rules).map_err(|e| {
            ConfigError::Validation(vec![ValidationError::InvalidRule {
                index: e.index,
                reason: e.source.to_string(),
            }])
        })?;

        let algorithm = config.algorithm;
        let read = Arc::new(Pool::new(Role::Read, config.read_srv.as_slice(), algorithm));
        let write = Arc::new(Pool::new(Role::Write, config.write_srv.as_slice(), algorithm));
        let websocket = Arc::new(Pool::new(Role::WebSocket, config.ws_srv.as_slice(), algorithm));

        Ok(Self {
            config,
            classifier,
            generation,
            read,
            write,
            websocket,
        })
    }

    pub fn pool(&self, role: Role) -> &Arc<Pool> {
        match role {
            Role::Read => &self.read,
            Role::Write => &self.write,
            Role::WebSocket => &self.websocket,
        }
    }

    /// The single WebSocket backend. Bypasses selection entirely.
    pub fn websocket_backend(&self) -> Option<&Arc<Backend>> {
        self.websocket.backends().first()
    }
}

/// Holds the current snapshot and swaps it on reload.
#[derive(Debug)]
pub struct BackendRegistry {
    current: ArcSwap<Snapshot>,
    generation: AtomicU64,
    /// Serializes concurrent reload triggers.
    reloading: Mutex<()>,
    source: Option<PathBuf>,
}

impl BackendRegistry {
    /// Create a registry from an initial configuration.
    pub fn new(config: FortitudeConfig) -> Result<Self, ConfigError> {
        let snapshot = Snapshot::build(config, 0)?;
        Ok(Self {
            current: ArcSwap::from_pointee(snapshot),
            generation: AtomicU64::new(0),
            reloading: Mutex::new(()),
            source: None,
        })
    }

    /// Create a registry that can reload itself from `path`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config = load_config(path)?;
        let mut registry = Self::new(config)?;
        registry.source = Some(path.to_path_buf());
        Ok(registry)
    }

    /// Associate a config file for [`BackendRegistry::reload_from_source`].
    pub fn with_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = Some(path.into());
        self
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// The current snapshot. Hold on to it for the duration of a request.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Pool for `role` in the current snapshot.
    pub fn get_pool(&self, role: Role) -> Arc<Pool> {
        self.current.load().pool(role).clone()
    }

    /// Replace the snapshot with one built from `config`.
    ///
    /// On error the previous snapshot stays in place.
    pub fn reload(&self, config: FortitudeConfig) -> Result<(), ConfigError> {
        let _reloading = self.reloading.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let generation = self.generation.load(Ordering::Acquire) + 1;
        let snapshot = match Snapshot::build(config, generation) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "Reload rejected, keeping current configuration");
                metrics::record_reload(false);
                return Err(e);
            }
        };

        tracing::info!(
            generation,
            algorithm = %snapshot.config.algorithm,
            read_backends = snapshot.read.backends().len(),
            write_backends = snapshot.write.backends().len(),
            read_rules = snapshot.config.read_rules.len(),
            "Configuration reloaded"
        );
        self.generation.store(generation, Ordering::Release);
        self.current.store(Arc::new(snapshot));
        metrics::record_reload(true);
        Ok(())
    }

    /// Re-read the associated config file and reload from it.
    pub fn reload_from_source(&self) -> Result<(), ReloadError> {
        let path = self.source.as_deref().ok_or(ReloadError::NoSource)?;
        let config = match load_config(path) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(path = ?path, error = %e, "Failed to load configuration");
                metrics::record_reload(false);
                return Err(e.into());
            }
        };
        self.reload(config)?;
        Ok(())
    }
}
