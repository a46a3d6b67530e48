//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (JSON)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → FortitudeConfig (validated, immutable)
//!     → BackendRegistry builds a Snapshot from it
//!
//! On reload (/fortitude-reload, SIGHUP, file watcher):
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap of Arc<Snapshot>
//!     → in-flight requests keep the snapshot they started with
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All optional fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    Algorithm, CompressionConfig, FortitudeConfig, ObservabilityConfig, ServerAddr, ServerList,
    TimeoutConfig, WebSocketConfig,
};
pub use validation::ValidationError;
