//! WebSocket upgrade handling.
//!
//! # Responsibilities
//! - Validate the client's upgrade request
//! - Complete the backend handshake before answering the client
//! - Answer 101 and hand the upgraded connection to the bridge
//!
//! # Data Flow
//! ```text
//! Client ──GET + Upgrade──▶ Proxy ──replayed GET + Upgrade──▶ Backend
//! Client ◀──101 + Accept─── Proxy ◀──────────101──────────── Backend
//! Client ◀═════════════ frames (websocket::bridge) ═════════════▶ Backend
//! ```
//!
//! # Design Decisions
//! - The backend is contacted first, so a dead backend surfaces as a 502
//!   (504 if it is too slow to connect or answer) instead of a WebSocket
//!   that closes right after opening
//! - The bridge runs on its own task, tracked until both sides are gone

use std::sync::Arc;

use axum::{
    body::Body,
    http::{
        header::{CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_PROTOCOL, UPGRADE},
        HeaderValue, Request, StatusCode,
    },
    response::{IntoResponse, Response},
};
use hyper_util::rt::TokioIo;

use crate::http::request::request_id;
use crate::http::server::AppState;
use crate::load_balancer::Snapshot;
use crate::websocket::{accept_key, client_key, connect_backend, run_bridge, BridgeSettings};

/// Upgrade the client connection and bridge it to the WebSocket backend.
pub async fn upgrade(state: &AppState, snapshot: Arc<Snapshot>, request: Request<Body>) -> Response {
    let request_id = request_id(request.headers()).to_string();
    let key = match client_key(request.headers()) {
        Ok(key) => key.to_string(),
        Err(e) => {
            tracing::debug!(request_id = %request_id, error = %e, "Rejected upgrade request");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    let Some(backend) = snapshot.websocket_backend().cloned() else {
        return (StatusCode::BAD_GATEWAY, "no websocket backend configured").into_response();
    };

    let settings = BridgeSettings::from_config(&snapshot.config);
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or("/");
    let stream = match connect_backend(&backend, path_and_query, request.headers(), &key, &settings).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(request_id = %request_id, backend = %backend.authority(), error = %e, "WebSocket backend unavailable");
            let status = if e.is_timeout() {
                StatusCode::GATEWAY_TIMEOUT
            } else {
                StatusCode::BAD_GATEWAY
            };
            return (status, e.to_string()).into_response();
        }
    };

    let protocol = stream.handshake.protocol.clone();
    let guard = state.connections.track();
    let on_upgrade = hyper::upgrade::on(request);
    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                tracing::info!(
                    request_id = %request_id,
                    connection_id = %guard.id(),
                    backend = %backend.authority(),
                    "WebSocket bridge opened"
                );
                let client = tokio::io::split(TokioIo::new(upgraded));
                run_bridge(client, (stream.reader, stream.writer), settings).await;
                tracing::info!(connection_id = %guard.id(), "WebSocket bridge closed");
            }
            Err(e) => {
                tracing::warn!(request_id = %request_id, error = %e, "Client upgrade failed");
            }
        }
    });

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = response.headers_mut();
    headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
    if let Ok(accept) = HeaderValue::from_str(&accept_key(&key)) {
        headers.insert(SEC_WEBSOCKET_ACCEPT, accept);
    }
    if let Some(protocol) = protocol.and_then(|p| HeaderValue::from_str(&p).ok()) {
        headers.insert(SEC_WEBSOCKET_PROTOCOL, protocol);
    }
    response
}
