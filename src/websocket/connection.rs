//! Per-connection WebSocket state and the write side of one peer.
//!
//! # State Machine
//! ```text
//! Handshake ──(101 exchanged)──▶ Open ──(close frame / error / peer gone)──▶ Closing ──▶ Closed
//! ```
//!
//! Both relay directions may write to the same peer (data from the other
//! side, pong and close replies from its own side), so writes go through a
//! per-connection lock. Closing takes the same lock, so a close frame is
//! never interleaved with a half-written data frame.

use std::sync::atomic::{AtomicU8, Ordering};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::websocket::frame::{write_frame, Frame, FrameError};

/// Lifecycle of one WebSocket connection.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsState {
    Handshake = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl From<u8> for WsState {
    fn from(val: u8) -> Self {
        match val {
            0 => WsState::Handshake,
            1 => WsState::Open,
            2 => WsState::Closing,
            _ => WsState::Closed,
        }
    }
}

/// Which end of the bridge a connection faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Peer {
    /// The downstream client. The proxy is the server here and never masks.
    Client,
    /// The upstream backend. The proxy is the client here and masks every frame.
    Backend,
}

impl Peer {
    pub fn as_str(self) -> &'static str {
        match self {
            Peer::Client => "client",
            Peer::Backend => "backend",
        }
    }

    /// Whether frames arriving from this peer must carry a mask.
    pub fn masks_frames(self) -> bool {
        self == Peer::Client
    }

    fn mask(self) -> Option<[u8; 4]> {
        match self {
            Peer::Client => None,
            Peer::Backend => Some(rand::random()),
        }
    }
}

/// The write half of one WebSocket connection plus its state.
#[derive(Debug)]
pub struct WsConnection<W> {
    peer: Peer,
    state: AtomicU8,
    writer: Mutex<W>,
}

impl<W> WsConnection<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Wrap a writer whose handshake has not completed yet.
    pub fn new(peer: Peer, writer: W) -> Self {
        Self {
            peer,
            state: AtomicU8::new(WsState::Handshake as u8),
            writer: Mutex::new(writer),
        }
    }

    /// Wrap a writer whose handshake already completed.
    pub fn open(peer: Peer, writer: W) -> Self {
        let conn = Self::new(peer, writer);
        conn.mark_open();
        conn
    }

    pub fn peer(&self) -> Peer {
        self.peer
    }

    pub fn state(&self) -> WsState {
        WsState::from(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == WsState::Open
    }

    /// Handshake → Open. Returns false if the connection was already past
    /// the handshake.
    pub fn mark_open(&self) -> bool {
        self.transition(WsState::Handshake, WsState::Open)
    }

    /// Send a frame, applying this peer's masking rule.
    ///
    /// Fails with [`FrameError::Closed`] once closing has begun.
    pub async fn send(&self, frame: Frame) -> Result<(), FrameError> {
        let frame = frame.with_mask(self.peer.mask());
        let mut writer = self.writer.lock().await;
        if !self.is_open() {
            return Err(FrameError::Closed);
        }
        write_frame(&mut *writer, &frame).await
    }

    /// Open → Closing → Closed, sending a close frame on the way.
    ///
    /// Send failures are swallowed. Calling this on a connection that is
    /// already closing or closed does nothing.
    pub async fn close(&self, code: u16, reason: &str) {
        let mut writer = self.writer.lock().await;
        if !self.transition(WsState::Open, WsState::Closing) {
            // Never opened: nothing to say goodbye to.
            if self.transition(WsState::Handshake, WsState::Closed) {
                let _ = writer.shutdown().await;
            }
            return;
        }

        let frame = Frame::close(code, reason).with_mask(self.peer.mask());
        if let Err(e) = write_frame(&mut *writer, &frame).await {
            tracing::debug!(peer = self.peer.as_str(), error = %e, "Close frame not delivered");
        }
        let _ = writer.shutdown().await;
        self.state.store(WsState::Closed as u8, Ordering::Release);
        tracing::debug!(peer = self.peer.as_str(), code, "WebSocket closed");
    }

    /// Mark the connection closed without sending anything.
    pub async fn abort(&self) {
        let mut writer = self.writer.lock().await;
        self.state.store(WsState::Closed as u8, Ordering::Release);
        let _ = writer.shutdown().await;
    }

    fn transition(&self, from: WsState, to: WsState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::frame::{read_frame, OpCode};

    #[tokio::test]
    async fn client_frames_are_unmasked_backend_frames_masked() {
        let (a, mut a_rx) = tokio::io::duplex(1024);
        let (b, mut b_rx) = tokio::io::duplex(1024);
        let client = WsConnection::open(Peer::Client, a);
        let backend = WsConnection::open(Peer::Backend, b);

        client.send(Frame::text("to client")).await.unwrap();
        backend.send(Frame::text("to backend")).await.unwrap();

        let f = read_frame(&mut a_rx, 1024).await.unwrap().unwrap();
        assert!(!f.is_masked());
        assert_eq!(f.payload, b"to client");

        let f = read_frame(&mut b_rx, 1024).await.unwrap().unwrap();
        assert!(f.is_masked());
        assert_eq!(f.payload, b"to backend");
    }

    #[tokio::test]
    async fn close_sends_once_then_rejects_writes() {
        let (a, mut rx) = tokio::io::duplex(1024);
        let conn = WsConnection::open(Peer::Client, a);

        conn.close(1000, "bye").await;
        conn.close(1000, "again").await;
        assert_eq!(conn.state(), WsState::Closed);
        assert!(matches!(conn.send(Frame::text("late")).await, Err(FrameError::Closed)));

        let f = read_frame(&mut rx, 1024).await.unwrap().unwrap();
        assert_eq!(f.opcode, OpCode::Close);
        assert_eq!(f.close_code(), Some(1000));
        assert!(read_frame(&mut rx, 1024).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn close_swallows_write_errors() {
        let (a, rx) = tokio::io::duplex(16);
        drop(rx);
        let conn = WsConnection::open(Peer::Backend, a);
        conn.close(1001, "gone").await;
        assert_eq!(conn.state(), WsState::Closed);
    }

    #[tokio::test]
    async fn handshake_state_cannot_send() {
        let (a, _rx) = tokio::io::duplex(16);
        let conn = WsConnection::new(Peer::Client, a);
        assert_eq!(conn.state(), WsState::Handshake);
        assert!(conn.send(Frame::ping("")).await.is_err());
        assert!(conn.mark_open());
        assert!(!conn.mark_open());
    }
}
