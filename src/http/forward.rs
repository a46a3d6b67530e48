//! Plain HTTP forwarding.
//!
//! # Responsibilities
//! - Classify the path into the read or write pool
//! - Pick a backend, honouring the sticky-session cookie when required
//! - Forward method, path, query, headers and body unchanged
//! - Map backend failures to gateway errors
//!
//! # Design Decisions
//! - The backend selection is a guard that travels with the response body
//!   and is released once the body completes, fails, or is dropped, so a
//!   backend still streaming a response keeps counting as busy
//! - The body wrapper reports the backend's size hint unchanged, which the
//!   compression layer's size predicate relies on
//! - Compression is applied by the router's layer stack, not here

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::{
    body::{Body, Bytes, HttpBody},
    http::{Request, StatusCode, Version},
    response::{IntoResponse, Response},
};
use hyper::body::{Frame, SizeHint};
use thiserror::Error;
use tokio::time::timeout;

use crate::http::request::{append_forwarded_for, backend_uri, request_id, session_key};
use crate::http::server::AppState;
use crate::load_balancer::{Role, Selection, Snapshot};
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("no backend available in the {0} pool")]
    NoBackend(Role),

    #[error("cannot address backend: {0}")]
    BadTarget(#[from] axum::http::Error),

    #[error("backend {backend} unreachable: {source}")]
    Unreachable {
        backend: String,
        #[source]
        source: hyper_util::client::legacy::Error,
    },

    #[error("backend {backend} did not respond within {secs}s")]
    Timeout { backend: String, secs: u64 },
}

impl ForwardError {
    pub fn status(&self) -> StatusCode {
        match self {
            ForwardError::NoBackend(_) => StatusCode::SERVICE_UNAVAILABLE,
            ForwardError::BadTarget(_) | ForwardError::Unreachable { .. } => StatusCode::BAD_GATEWAY,
            ForwardError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    fn backend(&self) -> &str {
        match self {
            ForwardError::Unreachable { backend, .. } | ForwardError::Timeout { backend, .. } => backend,
            _ => "none",
        }
    }
}

impl IntoResponse for ForwardError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Forward one request and relay the backend's response.
pub async fn forward(
    state: &AppState,
    snapshot: Arc<Snapshot>,
    client_addr: SocketAddr,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let request_id = request_id(request.headers()).to_string();

    match proxy(state, &snapshot, client_addr, request).await {
        Ok((response, backend)) => {
            metrics::record_request(&method, response.status().as_u16(), &backend, start);
            response
        }
        Err(e) => {
            let status = e.status();
            tracing::warn!(request_id = %request_id, status = status.as_u16(), error = %e, "Forwarding failed");
            metrics::record_request(&method, status.as_u16(), e.backend(), start);
            e.into_response()
        }
    }
}

async fn proxy(
    state: &AppState,
    snapshot: &Snapshot,
    client_addr: SocketAddr,
    request: Request<Body>,
) -> Result<(Response, String), ForwardError> {
    let config = &snapshot.config;
    let role = snapshot.classifier.classify(request.uri().path());
    let session = if config.algorithm.uses_session() {
        session_key(request.headers(), &config.session_cookie).map(str::to_owned)
    } else {
        None
    };

    let selection = snapshot
        .pool(role)
        .select(session.as_deref())
        .ok_or(ForwardError::NoBackend(role))?;
    let backend = selection.authority().to_string();

    tracing::debug!(
        request_id = %request_id(request.headers()),
        method = %request.method(),
        path = %request.uri().path(),
        role = %role,
        backend = %backend,
        "Forwarding request"
    );

    let (mut parts, body) = request.into_parts();
    parts.uri = backend_uri(&parts.uri, &backend)?;
    // The backend connection is always HTTP/1.1, whatever the client spoke.
    parts.version = Version::HTTP_11;
    append_forwarded_for(&mut parts.headers, client_addr);

    let secs = config.timeouts.request_secs;
    let response = match timeout(Duration::from_secs(secs), state.client.request(Request::from_parts(parts, body))).await {
        Ok(Ok(response)) => response,
        Ok(Err(source)) => return Err(ForwardError::Unreachable { backend, source }),
        Err(_) => return Err(ForwardError::Timeout { backend, secs }),
    };

    let (parts, body) = response.into_parts();
    let body = ReleaseOnEnd {
        inner: Body::new(body),
        selection: Some(selection),
    };
    Ok((Response::from_parts(parts, Body::new(body)), backend))
}

/// Response body that holds the backend selection until the body is done.
struct ReleaseOnEnd {
    inner: Body,
    selection: Option<Selection>,
}

impl HttpBody for ReleaseOnEnd {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Bytes>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        let finished = match &polled {
            Poll::Ready(None) | Poll::Ready(Some(Err(_))) => true,
            Poll::Ready(Some(Ok(_))) => this.inner.is_end_stream(),
            Poll::Pending => false,
        };
        if finished {
            this.selection = None;
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
