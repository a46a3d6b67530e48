//! Control endpoints: status introspection and reload trigger.

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::config::Algorithm;
use crate::http::server::AppState;
use crate::load_balancer::{Backend, Pool, Role, Snapshot};

pub const STATUS_PATH: &str = "/fortitude-status";
pub const RELOAD_PATH: &str = "/fortitude-reload";

/// Snapshot view served by the status endpoint.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub version: &'static str,
    pub generation: u64,
    pub algorithm: Algorithm,
    pub session_cookie: String,
    pub read_rules: Vec<String>,
    pub pools: Vec<PoolStatus>,
    pub websocket: Option<BackendStatus>,
    pub websocket_connections: u64,
}

#[derive(Debug, Serialize)]
pub struct PoolStatus {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<usize>,
    pub backends: Vec<BackendStatus>,
}

#[derive(Debug, Serialize)]
pub struct BackendStatus {
    pub host: String,
    pub port: u16,
    pub active_connections: usize,
    pub sessions: usize,
}

impl From<&Backend> for BackendStatus {
    fn from(backend: &Backend) -> Self {
        Self {
            host: backend.addr.host.clone(),
            port: backend.addr.port,
            active_connections: backend.active_connections(),
            sessions: backend.session_count(),
        }
    }
}

impl From<&Pool> for PoolStatus {
    fn from(pool: &Pool) -> Self {
        Self {
            role: pool.role(),
            cursor: pool.cursor(),
            backends: pool.backends().iter().map(|b| BackendStatus::from(b.as_ref())).collect(),
        }
    }
}

impl StatusReport {
    pub fn new(snapshot: &Snapshot, websocket_connections: u64) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            generation: snapshot.generation,
            algorithm: snapshot.config.algorithm,
            session_cookie: snapshot.config.session_cookie.clone(),
            read_rules: snapshot.classifier.sources(),
            pools: [Role::Read, Role::Write]
                .into_iter()
                .map(|role| PoolStatus::from(snapshot.pool(role).as_ref()))
                .collect(),
            websocket: snapshot.websocket_backend().map(|b| BackendStatus::from(b.as_ref())),
            websocket_connections,
        }
    }
}

/// `GET /fortitude-status`
pub fn status(state: &AppState, snapshot: Arc<Snapshot>) -> Response {
    Json(StatusReport::new(&snapshot, state.connections.active_count())).into_response()
}

/// `GET /fortitude-reload`
pub async fn reload(state: &AppState) -> Response {
    let registry = state.registry.clone();
    let result = tokio::task::spawn_blocking(move || registry.reload_from_source()).await;

    match result {
        Ok(Ok(())) => {
            let generation = state.registry.snapshot().generation;
            (StatusCode::OK, format!("reloaded, generation {generation}\n")).into_response()
        }
        Ok(Err(e)) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{e}\n")).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Reload task failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "reload task failed\n").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FortitudeConfig, ServerAddr};

    #[test]
    fn report_lists_pools_and_counters() {
        let config = FortitudeConfig {
            algorithm: Algorithm::Availability,
            read_srv: vec![ServerAddr::new("10.0.0.1", 80), ServerAddr::new("10.0.0.2", 80)].into(),
            write_srv: ServerAddr::new("10.0.0.3", 80).into(),
            ws_srv: ServerAddr::new("10.0.0.4", 9000).into(),
            read_rules: vec!["/static/".into()],
            ..FortitudeConfig::default()
        };
        let snapshot = Snapshot::build(config, 3).unwrap();
        let held = snapshot.pool(Role::Read).select(None).unwrap();

        let json = serde_json::to_value(StatusReport::new(&snapshot, 2)).unwrap();
        assert_eq!(json["generation"], 3);
        assert_eq!(json["algorithm"], "availability");
        assert_eq!(json["read_rules"][0], "/static/");
        assert_eq!(json["pools"][0]["role"], "read");
        assert_eq!(json["pools"][0]["backends"][0]["active_connections"], 1);
        assert_eq!(json["pools"][1]["backends"][0]["host"], "10.0.0.3");
        assert_eq!(json["websocket"]["port"], 9000);
        assert_eq!(json["websocket_connections"], 2);
        drop(held);
    }
}
