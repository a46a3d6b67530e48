//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Initialize logging, metrics and the backend registry in order
//! - Start background tasks (config watcher, signal handlers)
//! - Bind the listener and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners start last (traffic only when ready)

use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::config::watcher::ConfigWatcher;
use crate::config::ConfigError;
use crate::http::HttpServer;
use crate::lifecycle::{signals, Shutdown};
use crate::load_balancer::BackendRegistry;
use crate::net::{load_tls_config, TlsError};
use crate::observability::{logging, metrics};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid listen address {address}: {reason}")]
    Address { address: String, reason: String },

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("config watcher failed: {0}")]
    Watch(#[from] notify::Error),

    #[error("server error: {0}")]
    Serve(#[from] io::Error),
}

/// Run the proxy with the configuration at `config_path` until shut down.
pub async fn run(config_path: &Path) -> Result<(), StartupError> {
    let registry = Arc::new(BackendRegistry::from_file(config_path)?);
    let config = registry.snapshot().config.clone();

    logging::init_logging(&config.observability.log_level);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?config_path,
        algorithm = %config.algorithm,
        read_backends = config.read_srv.len(),
        write_backends = config.write_srv.len(),
        read_rules = config.read_rules.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Invalid metrics address, metrics disabled"
            ),
        }
    }

    // The watcher handle must outlive the server.
    let (_watcher, config_updates) = if config.watch {
        let (watcher, updates) = ConfigWatcher::new(config_path);
        (Some(watcher.run()?), updates)
    } else {
        let (_, updates) = mpsc::unbounded_channel();
        (None, updates)
    };

    let shutdown = Shutdown::new();
    tokio::spawn(signals::shutdown_on_signal(shutdown.clone()));
    signals::spawn_reload_on_sighup(registry.clone());

    let address = config.bind_address();
    let server = HttpServer::new(registry);

    if config.secure {
        let addr: SocketAddr = address.parse().map_err(|e: std::net::AddrParseError| StartupError::Address {
            address: address.clone(),
            reason: e.to_string(),
        })?;
        let tls = load_tls_config(&config).await?;
        server.run_tls(addr, tls, config_updates, shutdown.subscribe()).await?;
    } else {
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| StartupError::Bind {
                address: address.clone(),
                source,
            })?;
        server.run(listener, config_updates, shutdown.subscribe()).await?;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
