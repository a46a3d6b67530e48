//! Shared utilities for integration tests.
//!
//! Every backend and proxy binds `127.0.0.1:0`, so tests can run in parallel.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    http::{HeaderMap, Method, Uri},
    routing::{any, get},
    Json, Router,
};
use fortitude::config::{Algorithm, FortitudeConfig, ServerAddr, ServerList};
use fortitude::{BackendRegistry, HttpServer, Shutdown};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

pub const LARGE_BODY_LEN: usize = 8 * 1024;

/// Start an HTTP backend that answers every request with its `name`.
///
/// `/echo` returns the forwarded request as JSON and `/large` returns a
/// plain-text body of `LARGE_BODY_LEN` bytes.
pub async fn start_named_backend(name: &'static str) -> SocketAddr {
    let app = Router::new()
        .route("/echo", any(echo))
        .route("/large", get(|| async { "x".repeat(LARGE_BODY_LEN) }))
        .fallback(move || async move { name });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

async fn echo(method: Method, uri: Uri, headers: HeaderMap) -> Json<Value> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_owned);
    Json(json!({
        "method": method.as_str(),
        "uri": uri.to_string(),
        "x-forwarded-for": header("x-forwarded-for"),
        "x-request-id": header("x-request-id"),
        "cookie": header("cookie"),
    }))
}

/// A WebSocket echo backend that records the `Cookie` header of each handshake.
pub struct WsBackend {
    pub addr: SocketAddr,
    pub cookies: Arc<Mutex<Vec<String>>>,
}

pub async fn start_ws_echo_backend() -> WsBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cookies = Arc::new(Mutex::new(Vec::new()));
    let seen = cookies.clone();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let seen = seen.clone();
            tokio::spawn(async move {
                let record = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    if let Some(cookie) = req.headers().get("cookie").and_then(|v| v.to_str().ok()) {
                        seen.lock().unwrap().push(cookie.to_string());
                    }
                    Ok(resp)
                };
                let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, record).await else {
                    return;
                };
                while let Some(Ok(msg)) = ws.next().await {
                    if (msg.is_text() || msg.is_binary()) && ws.send(msg).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    WsBackend { addr, cookies }
}

/// An HTTP backend that sends its head at once, then `len` body bytes one
/// at a time with `delay` between them.
pub async fn start_trickle_backend(len: usize, delay: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let mut head = Vec::new();
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                let head = format!("HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: {len}\r\n\r\n");
                if stream.write_all(head.as_bytes()).await.is_err() {
                    return;
                }
                for _ in 0..len {
                    tokio::time::sleep(delay).await;
                    if stream.write_all(b"t").await.is_err() {
                        return;
                    }
                }
            });
        }
    });
    addr
}

/// A backend that accepts connections and never writes a byte.
pub async fn start_mute_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    addr
}

/// A loopback address with nothing listening on it.
pub async fn closed_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

fn server_list(addrs: &[SocketAddr]) -> ServerList {
    addrs
        .iter()
        .map(|a| ServerAddr::new(a.ip().to_string(), a.port()))
        .collect::<Vec<_>>()
        .into()
}

/// Proxy configuration routing `/static/` paths to `read`.
pub fn proxy_config(algorithm: Algorithm, read: &[SocketAddr], write: &[SocketAddr], ws: SocketAddr) -> FortitudeConfig {
    FortitudeConfig {
        algorithm,
        read_srv: server_list(read),
        write_srv: server_list(write),
        ws_srv: server_list(&[ws]),
        read_rules: vec!["/static/.*".into()],
        ..FortitudeConfig::default()
    }
}

/// Start a proxy serving `registry` on a fresh loopback port.
pub async fn start_proxy(registry: Arc<BackendRegistry>) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let (_, config_updates) = mpsc::unbounded_channel();
    let server = HttpServer::new(registry);
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, config_updates, server_shutdown).await;
    });

    (addr, shutdown)
}

/// Fetch the proxy's status report.
pub async fn status(proxy: SocketAddr) -> Value {
    http_client()
        .get(format!("http://{proxy}/fortitude-status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}
