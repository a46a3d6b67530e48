//! Opening handshake, both towards the client and towards the backend.

use axum::http::header::{
    HeaderMap, CONNECTION, HOST, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_EXTENSIONS, SEC_WEBSOCKET_KEY,
    SEC_WEBSOCKET_PROTOCOL, SEC_WEBSOCKET_VERSION, UPGRADE,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ring::digest;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Global Identifier for WebSockets, see RFC 6455
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on the backend's handshake response head.
const MAX_RESPONSE_HEAD: usize = 16 * 1024;

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("missing or invalid Upgrade header")]
    MissingUpgrade,

    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,

    #[error("io error during handshake: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend refused upgrade: {0}")]
    Refused(String),

    #[error("backend sent a wrong Sec-WebSocket-Accept")]
    AcceptMismatch,

    #[error("malformed handshake response: {0}")]
    Malformed(&'static str),
}

/// `Sec-WebSocket-Accept` value for a client key.
pub fn accept_key(key: &str) -> String {
    let mut data = String::with_capacity(key.len() + WEBSOCKET_GUID.len());
    data.push_str(key.trim());
    data.push_str(WEBSOCKET_GUID);
    let sha1 = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, data.as_bytes());
    STANDARD.encode(sha1.as_ref())
}

/// Whether the request asks to be upgraded to WebSocket.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    headers
        .get_all(UPGRADE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|p| p.trim().eq_ignore_ascii_case("websocket"))
}

/// Validate an upgrade request and return its `Sec-WebSocket-Key`.
pub fn client_key(headers: &HeaderMap) -> Result<&str, HandshakeError> {
    if !is_upgrade_request(headers) {
        return Err(HandshakeError::MissingUpgrade);
    }
    headers
        .get(SEC_WEBSOCKET_KEY)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or(HandshakeError::MissingKey)
}

/// Build the raw upgrade request replayed to the backend.
///
/// Client headers are copied verbatim (cookies included) except the
/// connection-level upgrade headers, which are rewritten, and
/// `Sec-WebSocket-Extensions`, since the relay cannot speak compressed frames.
pub fn backend_request(path_and_query: &str, authority: &str, headers: &HeaderMap, key: &str) -> Vec<u8> {
    let mut head = format!("GET {path_and_query} HTTP/1.1\r\n");
    if !headers.contains_key(HOST) {
        head.push_str(&format!("Host: {authority}\r\n"));
    }
    head.push_str("Upgrade: websocket\r\nConnection: Upgrade\r\n");
    head.push_str(&format!("Sec-WebSocket-Key: {key}\r\nSec-WebSocket-Version: 13\r\n"));

    let skip = [
        UPGRADE,
        CONNECTION,
        SEC_WEBSOCKET_KEY,
        SEC_WEBSOCKET_VERSION,
        SEC_WEBSOCKET_EXTENSIONS,
    ];
    let mut bytes = head.into_bytes();
    for (name, value) in headers {
        if skip.contains(name) {
            continue;
        }
        bytes.extend_from_slice(name.as_str().as_bytes());
        bytes.extend_from_slice(b": ");
        bytes.extend_from_slice(value.as_bytes());
        bytes.extend_from_slice(b"\r\n");
    }
    bytes.extend_from_slice(b"\r\n");
    bytes
}

/// What the backend agreed to in its 101 response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendHandshake {
    /// Subprotocol selected by the backend, relayed to the client.
    pub protocol: Option<String>,
}

/// Read the backend's handshake response up to the blank line.
///
/// Bytes after the response head stay buffered in `reader` for the frame pump.
pub async fn read_backend_response<R>(reader: &mut R, key: &str) -> Result<BackendHandshake, HandshakeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut consumed = 0;
    let mut line = String::new();

    consumed += read_head_line(reader, &mut line).await?;
    let mut status = line.split_whitespace();
    match (status.next(), status.next()) {
        (Some(version), Some("101")) if version.starts_with("HTTP/1.") => {}
        (Some(_), Some(_)) => return Err(HandshakeError::Refused(line.trim_end().to_string())),
        _ => return Err(HandshakeError::Malformed("status line")),
    }

    let expected = accept_key(key);
    let mut accepted = false;
    let mut handshake = BackendHandshake::default();
    loop {
        line.clear();
        consumed += read_head_line(reader, &mut line).await?;
        if consumed > MAX_RESPONSE_HEAD {
            return Err(HandshakeError::Malformed("response head too large"));
        }
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            break;
        }
        let (name, value) = trimmed
            .split_once(':')
            .ok_or(HandshakeError::Malformed("header line"))?;
        let value = value.trim();
        if name.eq_ignore_ascii_case(SEC_WEBSOCKET_ACCEPT.as_str()) {
            if value != expected {
                return Err(HandshakeError::AcceptMismatch);
            }
            accepted = true;
        } else if name.eq_ignore_ascii_case(SEC_WEBSOCKET_PROTOCOL.as_str()) {
            handshake.protocol = Some(value.to_string());
        }
    }

    if !accepted {
        return Err(HandshakeError::AcceptMismatch);
    }
    Ok(handshake)
}

async fn read_head_line<R>(reader: &mut R, line: &mut String) -> Result<usize, HandshakeError>
where
    R: AsyncBufRead + Unpin,
{
    let n = reader.read_line(line).await?;
    if n == 0 {
        return Err(HandshakeError::Malformed("connection closed during handshake"));
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use tokio::io::{AsyncReadExt, BufReader};

    #[test]
    fn accept_key_matches_rfc_example() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn client_key_requires_upgrade_and_key() {
        let mut headers = HeaderMap::new();
        assert!(matches!(client_key(&headers), Err(HandshakeError::MissingUpgrade)));

        headers.insert(UPGRADE, HeaderValue::from_static("WebSocket"));
        assert!(matches!(client_key(&headers), Err(HandshakeError::MissingKey)));

        headers.insert(SEC_WEBSOCKET_KEY, HeaderValue::from_static("dGhlIHNhbXBsZSBub25jZQ=="));
        assert_eq!(client_key(&headers).unwrap(), "dGhlIHNhbXBsZSBub25jZQ==");
    }

    #[test]
    fn backend_request_replays_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("proxy.example"));
        headers.insert("cookie", HeaderValue::from_static("session=abc"));
        headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(SEC_WEBSOCKET_EXTENSIONS, HeaderValue::from_static("permessage-deflate"));

        let raw = String::from_utf8(backend_request("/chat?room=1", "10.0.0.1:9000", &headers, "k==")).unwrap();
        assert!(raw.starts_with("GET /chat?room=1 HTTP/1.1\r\n"));
        assert!(raw.contains("cookie: session=abc\r\n"));
        assert!(raw.contains("host: proxy.example\r\n"));
        assert!(raw.contains("Sec-WebSocket-Key: k==\r\n"));
        assert!(!raw.contains("permessage-deflate"));
        assert_eq!(raw.matches("Upgrade: websocket").count(), 1);
        assert!(raw.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn reads_backend_response_and_keeps_trailing_bytes() {
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        let raw = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\nSec-WebSocket-Protocol: chat\r\n\r\n\x81\x02hi";
        let mut reader = BufReader::new(&raw[..]);

        let handshake = read_backend_response(&mut reader, key).await.unwrap();
        assert_eq!(handshake.protocol.as_deref(), Some("chat"));

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"\x81\x02hi");
    }

    #[tokio::test]
    async fn rejects_refusal_and_bad_accept() {
        let raw = b"HTTP/1.1 403 Forbidden\r\n\r\n";
        let err = read_backend_response(&mut BufReader::new(&raw[..]), "k").await.unwrap_err();
        assert!(matches!(err, HandshakeError::Refused(_)));

        let raw = b"HTTP/1.1 101 Switching Protocols\r\nSec-WebSocket-Accept: nope\r\n\r\n";
        let err = read_backend_response(&mut BufReader::new(&raw[..]), "k").await.unwrap_err();
        assert!(matches!(err, HandshakeError::AcceptMismatch));
    }
}
