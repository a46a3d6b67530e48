//! Frame relay between an upgraded client and the WebSocket backend.
//!
//! # Responsibilities
//! - Open the backend connection and replay the client's upgrade request
//! - Run one pump per direction, each on its own task
//! - Answer pings locally and echo close frames to the side that sent them
//! - Once either direction ends, close the other side within a bounded time
//!
//! # Design Decisions
//! - Frames are relayed one at a time with their fin bit and opcode intact,
//!   so fragmented messages pass through without reassembly
//! - A pump that cannot finish within `close_timeout` is aborted, which
//!   drops its socket half

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::FortitudeConfig;
use crate::load_balancer::Backend;
use crate::observability::metrics;
use crate::websocket::connection::{Peer, WsConnection};
use crate::websocket::frame::{read_frame, CloseCode, Frame, FrameError, OpCode};
use crate::websocket::handshake::{backend_request, read_backend_response, BackendHandshake, HandshakeError};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to connect to websocket backend {backend}: {source}")]
    Connect {
        backend: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out connecting to websocket backend {0}")]
    ConnectTimeout(String),

    #[error("websocket backend {0} did not complete the handshake in time")]
    HandshakeTimeout(String),

    #[error("backend handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
}

/// Limits applied to one bridged connection.
#[derive(Debug, Clone, Copy)]
pub struct BridgeSettings {
    pub max_frame_size: u64,
    pub close_timeout: Duration,
    pub connect_timeout: Duration,
    /// Limit on the backend answering the replayed upgrade request.
    pub handshake_timeout: Duration,
}

impl BridgeError {
    /// Whether the backend was reached too slowly rather than refused.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BridgeError::ConnectTimeout(_) | BridgeError::HandshakeTimeout(_))
    }
}

impl BridgeSettings {
    pub fn from_config(config: &FortitudeConfig) -> Self {
        Self {
            max_frame_size: config.websocket.max_frame_size,
            close_timeout: Duration::from_millis(config.websocket.close_timeout_ms),
            connect_timeout: Duration::from_secs(config.timeouts.connect_secs),
            handshake_timeout: Duration::from_secs(config.timeouts.request_secs),
        }
    }
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self::from_config(&FortitudeConfig::default())
    }
}

/// A backend connection that completed its opening handshake.
#[derive(Debug)]
pub struct BackendStream {
    pub reader: BufReader<OwnedReadHalf>,
    pub writer: OwnedWriteHalf,
    pub handshake: BackendHandshake,
}

/// Connect to `backend` and replay the client's upgrade request.
///
/// The client's own `Sec-WebSocket-Key` is reused, so the accept value the
/// backend returns is the one the client expects. Connecting and the
/// handshake each run under their own limit from `settings`.
pub async fn connect_backend(
    backend: &Backend,
    path_and_query: &str,
    headers: &HeaderMap,
    key: &str,
    settings: &BridgeSettings,
) -> Result<BackendStream, BridgeError> {
    let authority = backend.authority();
    let stream = timeout(settings.connect_timeout, TcpStream::connect(authority))
        .await
        .map_err(|_| BridgeError::ConnectTimeout(authority.to_string()))?
        .map_err(|source| BridgeError::Connect {
            backend: authority.to_string(),
            source,
        })?;
    let _ = stream.set_nodelay(true);

    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let request = backend_request(path_and_query, authority, headers, key);
    let exchange = async {
        writer.write_all(&request).await.map_err(HandshakeError::from)?;
        read_backend_response(&mut reader, key).await
    };
    let handshake = timeout(settings.handshake_timeout, exchange)
        .await
        .map_err(|_| BridgeError::HandshakeTimeout(authority.to_string()))??;
    tracing::debug!(backend = %authority, protocol = ?handshake.protocol, "Backend websocket handshake complete");

    Ok(BackendStream {
        reader,
        writer,
        handshake,
    })
}

/// Why one pump direction stopped.
#[derive(Debug)]
enum PumpEnd {
    /// The source sent a close frame.
    Closed(Option<u16>),
    /// The source stream ended without a close frame.
    Eof,
    /// Reading from the source failed.
    Failed(FrameError),
    /// The sink stopped accepting frames.
    SinkGone,
}

/// Relay frames between both sides until either one goes away.
pub async fn run_bridge<CR, CW, BR, BW>(client: (CR, CW), backend: (BR, BW), settings: BridgeSettings)
where
    CR: AsyncRead + Unpin + Send + 'static,
    CW: AsyncWrite + Unpin + Send + 'static,
    BR: AsyncRead + Unpin + Send + 'static,
    BW: AsyncWrite + Unpin + Send + 'static,
{
    let (client_reader, client_writer) = client;
    let (backend_reader, backend_writer) = backend;
    let client_conn = Arc::new(WsConnection::open(Peer::Client, client_writer));
    let backend_conn = Arc::new(WsConnection::open(Peer::Backend, backend_writer));
    let max = settings.max_frame_size;

    let mut upstream = spawn_direction(client_reader, client_conn.clone(), backend_conn.clone(), max, "upstream");
    let mut downstream = spawn_direction(backend_reader, backend_conn.clone(), client_conn.clone(), max, "downstream");

    tokio::select! {
        _ = &mut upstream => drain(downstream, settings.close_timeout).await,
        _ = &mut downstream => drain(upstream, settings.close_timeout).await,
    }

    // Whatever is still open at this point has been given its chance.
    client_conn.abort().await;
    backend_conn.abort().await;
    tracing::debug!("WebSocket bridge finished");
}

fn spawn_direction<R, A, B>(
    reader: R,
    source: Arc<WsConnection<A>>,
    sink: Arc<WsConnection<B>>,
    max_frame_size: u64,
    direction: &'static str,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    A: AsyncWrite + Unpin + Send + 'static,
    B: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let end = pump(reader, &source, &sink, max_frame_size, direction).await;
        tracing::debug!(direction, end = ?end, "WebSocket direction ended");
        settle(end, &source, &sink).await;
    })
}

async fn pump<R, A, B>(
    mut reader: R,
    source: &WsConnection<A>,
    sink: &WsConnection<B>,
    max_frame_size: u64,
    direction: &'static str,
) -> PumpEnd
where
    R: AsyncRead + Unpin,
    A: AsyncWrite + Unpin + Send,
    B: AsyncWrite + Unpin + Send,
{
    loop {
        let frame = match read_frame(&mut reader, max_frame_size).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return PumpEnd::Eof,
            Err(e) => return PumpEnd::Failed(e),
        };
        if frame.is_masked() != source.peer().masks_frames() {
            return PumpEnd::Failed(FrameError::BadMasking);
        }

        match frame.opcode {
            OpCode::Ping => {
                if source.send(Frame::pong(frame.payload)).await.is_err() {
                    return PumpEnd::SinkGone;
                }
            }
            OpCode::Pong => {}
            OpCode::Close => {
                return match frame.validate_close() {
                    Ok(code) => PumpEnd::Closed(code),
                    Err(e) => PumpEnd::Failed(e),
                }
            }
            OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                let relayed = Frame {
                    fin: frame.fin,
                    opcode: frame.opcode,
                    mask: None,
                    payload: frame.payload,
                };
                if sink.send(relayed).await.is_err() {
                    return PumpEnd::SinkGone;
                }
                metrics::record_websocket_frame(direction);
            }
        }
    }
}

/// Close both sides according to how the pump ended.
async fn settle<A, B>(end: PumpEnd, source: &WsConnection<A>, sink: &WsConnection<B>)
where
    A: AsyncWrite + Unpin + Send,
    B: AsyncWrite + Unpin + Send,
{
    match end {
        PumpEnd::Closed(code) => {
            let code = code.unwrap_or(CloseCode::Normal.as_u16());
            source.close(code, "").await;
            sink.close(code, "").await;
        }
        PumpEnd::Failed(e) => {
            match e.close_code() {
                Some(code) => {
                    tracing::warn!(peer = source.peer().as_str(), error = %e, "WebSocket protocol violation");
                    source.close(code.as_u16(), "").await;
                }
                None => {
                    tracing::debug!(peer = source.peer().as_str(), error = %e, "WebSocket read failed");
                    source.abort().await;
                }
            }
            sink.close(CloseCode::GoingAway.as_u16(), "").await;
        }
        PumpEnd::Eof => {
            source.abort().await;
            sink.close(CloseCode::GoingAway.as_u16(), "").await;
        }
        PumpEnd::SinkGone => {
            source.close(CloseCode::GoingAway.as_u16(), "").await;
        }
    }
}

/// Give the surviving direction `limit` to finish, then abort it.
async fn drain(mut handle: JoinHandle<()>, limit: Duration) {
    if timeout(limit, &mut handle).await.is_err() {
        tracing::debug!(timeout_ms = limit.as_millis() as u64, "WebSocket peer did not close in time");
        handle.abort();
    }
}
