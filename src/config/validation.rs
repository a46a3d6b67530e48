//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Reject empty pools and a WebSocket pool that is not exactly one server
//! - Validate value ranges (ports, timeouts)
//! - Check every read rule compiles
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: FortitudeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;

use crate::config::schema::{FortitudeConfig, ServerList};
use crate::routing::matcher::RegexRule;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} must list at least one server")]
    EmptyPool(&'static str),

    #[error("ws_srv must name exactly one server, found {0}")]
    WebSocketPoolSize(usize),

    #[error("{field}: server {index} has an empty host")]
    EmptyHost { field: &'static str, index: usize },

    #[error("{field}: server {index} has port 0")]
    ZeroPort { field: &'static str, index: usize },

    #[error("http_port must not be 0")]
    ZeroListenPort,

    #[error("read_rules[{index}] is not a valid pattern: {reason}")]
    InvalidRule { index: usize, reason: String },

    #[error("secure is set but {0} is missing")]
    MissingTlsMaterial(&'static str),

    #[error("timeouts.{0} must be greater than 0")]
    ZeroTimeout(&'static str),

    #[error("session_cookie must not be empty")]
    EmptySessionCookie,
}

/// Validate a parsed configuration, collecting every error found.
pub fn validate_config(config: &FortitudeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_pool("read_srv", &config.read_srv, &mut errors);
    check_pool("write_srv", &config.write_srv, &mut errors);
    if config.ws_srv.len() != 1 {
        errors.push(ValidationError::WebSocketPoolSize(config.ws_srv.len()));
    } else {
        check_pool("ws_srv", &config.ws_srv, &mut errors);
    }

    if config.http_port == 0 {
        errors.push(ValidationError::ZeroListenPort);
    }

    for (index, rule) in config.read_rules.iter().enumerate() {
        if let Err(e) = RegexRule::new(rule) {
            errors.push(ValidationError::InvalidRule {
                index,
                reason: e.to_string(),
            });
        }
    }

    if config.secure {
        if config.secure_cert.as_deref().map_or(true, str::is_empty) {
            errors.push(ValidationError::MissingTlsMaterial("secure_cert"));
        }
        if config.secure_key.as_deref().map_or(true, str::is_empty) {
            errors.push(ValidationError::MissingTlsMaterial("secure_key"));
        }
    }

    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("connect_secs"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("request_secs"));
    }

    if config.algorithm.uses_session() && config.session_cookie.is_empty() {
        errors.push(ValidationError::EmptySessionCookie);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_pool(field: &'static str, servers: &ServerList, errors: &mut Vec<ValidationError>) {
    if servers.is_empty() {
        errors.push(ValidationError::EmptyPool(field));
        return;
    }
    for (index, server) in servers.as_slice().iter().enumerate() {
        if server.host.trim().is_empty() {
            errors.push(ValidationError::EmptyHost { field, index });
        }
        if server.port == 0 {
            errors.push(ValidationError::ZeroPort { field, index });
        }
    }
}
