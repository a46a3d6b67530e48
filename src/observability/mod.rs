//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured fields (backend, role, request_id) on every event
//! - Request ID flows from the dispatcher to the backend request
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
