//! Fortitude: an HTTP/WebSocket load-balancing reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────┐
//!                     │                      FORTITUDE                        │
//!                     │                                                      │
//!   Client Request    │  ┌─────────┐   ┌────────────┐   ┌──────────────┐    │
//!   ──────────────────┼─▶│   net   │──▶│    http    │──▶│   routing    │    │
//!                     │  │  (tls)  │   │  dispatch  │   │  classifier  │    │
//!                     │  └─────────┘   └─────┬──────┘   └──────┬───────┘    │
//!                     │                      │                 ▼            │
//!                     │          Upgrade     │         ┌──────────────┐     │
//!                     │                      ▼         │load_balancer │     │
//!                     │               ┌────────────┐   │ registry +   │     │
//!                     │               │ websocket  │   │ pools        │     │
//!                     │               │  bridge    │   └──────┬───────┘     │
//!                     │               └─────┬──────┘          │             │
//!                     │                     ▼                 ▼             │
//!                     │                 WS backend      read / write   ─────┼──▶ Backends
//!                     │                                                      │
//!                     │  config · lifecycle · observability (cross-cutting)  │
//!                     └──────────────────────────────────────────────────────┘
//! ```

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod routing;

// Traffic management
pub mod load_balancer;
pub mod websocket;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::FortitudeConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use load_balancer::BackendRegistry;
