//! Static/write path classification.
//!
//! # Responsibilities
//! - Hold the ordered, compiled read rules
//! - Decide whether a path is served by the read pool
//!
//! # Design Decisions
//! - Immutable after construction; lives inside the config snapshot
//! - First match wins, in configuration order
//! - No match means the request goes to the write pool

use thiserror::Error;

use crate::load_balancer::Role;
use crate::routing::matcher::{Matcher, RegexRule};

/// A read rule that failed to compile.
#[derive(Debug, Error)]
#[error("read rule {index} is invalid: {source}")]
pub struct RuleError {
    pub index: usize,
    #[source]
    pub source: regex::Error,
}

/// Ordered list of read rules.
#[derive(Debug, Default)]
pub struct PathClassifier {
    rules: Vec<Box<dyn Matcher>>,
}

impl PathClassifier {
    /// Compile the configured rules, preserving their order.
    pub fn from_rules<S: AsRef<str>>(rules: &[S]) -> Result<Self, RuleError> {
        let rules = rules
            .iter()
            .enumerate()
            .map(|(index, r)| {
                RegexRule::new(r.as_ref())
                    .map(|m| Box::new(m) as Box<dyn Matcher>)
                    .map_err(|source| RuleError { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Returns true if the path should be served by the read pool.
    pub fn is_static(&self, path: &str) -> bool {
        self.matching_rule(path).is_some()
    }

    /// The first rule matching `path`, if any.
    pub fn matching_rule(&self, path: &str) -> Option<&dyn Matcher> {
        self.rules
            .iter()
            .find(|rule| rule.matches(path))
            .map(|rule| rule.as_ref())
    }

    /// Pool role for a path.
    pub fn classify(&self, path: &str) -> Role {
        if self.is_static(path) {
            Role::Read
        } else {
            Role::Write
        }
    }

    /// The configured rule sources, in order.
    pub fn sources(&self) -> Vec<String> {
        self.rules.iter().map(|r| r.source().to_string()).collect()
    }
}
