//! HTTP server setup and request dispatch.
//!
//! # Responsibilities
//! - Create the Axum router and its middleware (tracing, request ID, gzip)
//! - Dispatch each request to a control endpoint, the WebSocket upgrade
//!   path or the forwarding handler
//! - Apply configuration updates pushed by the watcher or signals
//! - Serve over plain TCP or TLS with graceful shutdown

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Method, Request},
    response::Response,
    routing::any,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{
    compression::{
        predicate::{NotForContentType, Predicate, SizeAbove},
        CompressionLayer,
    },
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::FortitudeConfig;
use crate::http::control::{self, RELOAD_PATH, STATUS_PATH};
use crate::http::forward::forward;
use crate::http::request::MakeRequestUuidV4;
use crate::http::websocket;
use crate::load_balancer::BackendRegistry;
use crate::net::ConnectionTracker;
use crate::websocket::is_upgrade_request;

/// How long shutdown waits for open WebSocket bridges.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<BackendRegistry>,
    pub client: Client<HttpConnector, Body>,
    pub connections: ConnectionTracker,
}

/// HTTP server for the proxy.
pub struct HttpServer {
    router: Router,
    registry: Arc<BackendRegistry>,
    connections: ConnectionTracker,
}

impl HttpServer {
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        let snapshot = registry.snapshot();
        let config = &snapshot.config;

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(config.timeouts.connect_secs)));
        connector.set_nodelay(true);
        let client = Client::builder(TokioExecutor::new()).build(connector);

        let connections = ConnectionTracker::new();
        let state = AppState {
            registry: registry.clone(),
            client,
            connections: connections.clone(),
        };

        let router = Self::build_router(config, state);
        Self {
            router,
            registry,
            connections,
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &FortitudeConfig, state: AppState) -> Router {
        let router = Router::new()
            .route("/", any(dispatch))
            .route("/{*path}", any(dispatch))
            .with_state(state);

        let router = if config.compression.enabled {
            let predicate = SizeAbove::new(config.compression.min_size)
                .and(NotForContentType::GRPC)
                .and(NotForContentType::IMAGES)
                .and(NotForContentType::SSE);
            router.layer(CompressionLayer::new().gzip(true).compress_when(predicate))
        } else {
            router
        };

        router
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV4))
            .layer(TraceLayer::new_for_http())
    }

    /// Number of WebSocket bridges currently open.
    pub fn active_connections(&self) -> u64 {
        self.connections.active_count()
    }

    /// Serve plain HTTP on `listener` until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: mpsc::UnboundedReceiver<FortitudeConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        spawn_config_updates(self.registry.clone(), config_updates);

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server shutting down");
            })
            .await?;

        drain(&self.connections).await;
        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Serve HTTPS on `addr` until `shutdown` fires.
    pub async fn run_tls(
        self,
        addr: SocketAddr,
        tls: RustlsConfig,
        config_updates: mpsc::UnboundedReceiver<FortitudeConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> io::Result<()> {
        tracing::info!(address = %addr, "HTTPS server starting");

        spawn_config_updates(self.registry.clone(), config_updates);

        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTPS server shutting down");
            shutdown_handle.graceful_shutdown(Some(DRAIN_TIMEOUT));
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum_server::bind_rustls(addr, tls).handle(handle).serve(app).await?;

        drain(&self.connections).await;
        tracing::info!("HTTPS server stopped");
        Ok(())
    }
}

/// Apply configurations pushed by the file watcher or SIGHUP.
fn spawn_config_updates(registry: Arc<BackendRegistry>, mut updates: mpsc::UnboundedReceiver<FortitudeConfig>) {
    tokio::spawn(async move {
        while let Some(config) = updates.recv().await {
            // Errors are logged by the registry; the old snapshot stays.
            let _ = registry.reload(config);
        }
    });
}

async fn drain(connections: &ConnectionTracker) {
    let open = connections.active_count();
    if open == 0 {
        return;
    }
    tracing::info!(open, "Waiting for WebSocket bridges to close");
    if !connections.wait_for_shutdown(DRAIN_TIMEOUT).await {
        tracing::warn!(open = connections.active_count(), "WebSocket bridges still open at shutdown");
    }
}

/// Connection dispatcher: control endpoints, upgrades, then forwarding.
async fn dispatch(
    State(state): State<AppState>,
    ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    // One snapshot for the whole request, even if a reload lands mid-flight.
    let snapshot = state.registry.snapshot();

    if request.method() == Method::GET {
        match request.uri().path() {
            STATUS_PATH => return control::status(&state, snapshot),
            RELOAD_PATH => return control::reload(&state).await,
            _ => {}
        }
    }

    if is_upgrade_request(request.headers()) {
        return websocket::upgrade(&state, snapshot, request).await;
    }

    forward(&state, snapshot, client_addr, request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServerAddr, ServerList};
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::{header, StatusCode};
    use tower::ServiceExt;

    fn registry(port: u16) -> Arc<BackendRegistry> {
        let backend = ServerList::from(ServerAddr::new("127.0.0.1", port));
        let config = FortitudeConfig {
            read_srv: backend.clone(),
            write_srv: backend.clone(),
            ws_srv: backend,
            read_rules: vec!["/static/".into()],
            ..FortitudeConfig::default()
        };
        Arc::new(BackendRegistry::new(config).unwrap())
    }

    fn app(registry: Arc<BackendRegistry>) -> Router {
        HttpServer::new(registry)
            .router
            .layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))))
    }

    /// A loopback port with nothing listening on it.
    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn status_endpoint_serves_snapshot() {
        let response = app(registry(9))
            .oneshot(Request::get(STATUS_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["generation"], 0);
        assert_eq!(json["algorithm"], "robin");
        assert_eq!(json["pools"][0]["backends"][0]["port"], 9);
    }

    #[tokio::test]
    async fn reload_without_file_is_500() {
        let response = app(registry(9))
            .oneshot(Request::get(RELOAD_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn upgrade_without_key_is_400() {
        let request = Request::get("/chat")
            .header(header::UPGRADE, "websocket")
            .header(header::CONNECTION, "Upgrade")
            .body(Body::empty())
            .unwrap();
        let response = app(registry(9)).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn dead_backend_is_502_and_released() {
        let registry = registry(closed_port().await);
        let response = app(registry.clone())
            .oneshot(Request::post("/orders").body(Body::from("{}")).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let response = app(registry)
            .oneshot(
                Request::get("/chat")
                    .header(header::UPGRADE, "websocket")
                    .header(header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn control_paths_only_answer_get() {
        let port = closed_port().await;
        let response = app(registry(port))
            .oneshot(Request::post(STATUS_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        // Forwarded like any other request, to a backend that is not there.
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
