//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, request ID, tracing, gzip)
//!     → server.rs dispatch:
//!         - control.rs (/fortitude-status, /fortitude-reload)
//!         - websocket.rs (Upgrade: websocket → bridge)
//!         - forward.rs (classify → select → forward → relay)
//!     → Send to client
//! ```

pub mod control;
pub mod forward;
pub mod request;
pub mod server;
pub mod websocket;

pub use control::StatusReport;
pub use forward::ForwardError;
pub use request::{MakeRequestUuidV4, X_FORWARDED_FOR, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
