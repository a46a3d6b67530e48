//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → tls.rs (optional, when `secure` is set)
//!     → HTTP layer (one task per connection)
//!     → connection.rs (tracks upgraded WebSocket bridges)
//! ```
//!
//! # Design Decisions
//! - TLS is terminated before the dispatcher, which never knows whether
//!   the connection is encrypted
//! - Only bridged WebSocket connections are tracked; plain requests are
//!   drained by the server's own graceful shutdown

pub mod connection;
pub mod tls;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use tls::{load_tls_config, TlsError};
