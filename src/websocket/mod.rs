//! WebSocket proxying.
//!
//! # Responsibilities
//! - Parse and serialize RFC 6455 frames
//! - Complete the upgrade handshake with the client and the backend
//! - Track each connection's lifecycle
//! - Relay frames in both directions
//!
//! # Data Flow
//! ```text
//! Client ←──── frames (unmasked out) ────→ Proxy ←──── frames (masked out) ────→ Backend
//!            handshake.rs (101, accept key)        handshake.rs (replayed upgrade)
//!                              bridge.rs (one pump per direction)
//! ```
//!
//! # Design Decisions
//! - The server side of the protocol is implemented here by hand; no
//!   WebSocket library sits between the proxy and either peer
//! - The single configured WebSocket backend is used directly, never
//!   through a selection algorithm

pub mod bridge;
pub mod connection;
pub mod frame;
pub mod handshake;

pub use bridge::{connect_backend, run_bridge, BackendStream, BridgeError, BridgeSettings};
pub use connection::{Peer, WsConnection, WsState};
pub use frame::{CloseCode, Frame, FrameError, OpCode};
pub use handshake::{accept_key, client_key, is_upgrade_request, HandshakeError};
