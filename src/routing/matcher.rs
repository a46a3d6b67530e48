//! Path rule matching.
//!
//! # Responsibilities
//! - Compile configured read rules
//! - Match a request path against a single rule
//!
//! # Design Decisions
//! - Rules are regular expressions anchored at the start of the path,
//!   so a plain literal like `/assets/` behaves as a prefix rule
//! - Path matching is case-sensitive
//! - Query strings are never part of the matched path

use regex::Regex;

/// Trait for matching request paths against a rule.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the path matches this rule.
    fn matches(&self, path: &str) -> bool;

    /// The rule as written in the configuration.
    fn source(&self) -> &str;
}

/// A read rule compiled from its configured pattern.
#[derive(Debug, Clone)]
pub struct RegexRule {
    source: String,
    regex: Regex,
}

impl RegexRule {
    /// Compile a rule. The pattern is anchored at the start of the path.
    pub fn new(pattern: impl Into<String>) -> Result<Self, regex::Error> {
        let source = pattern.into();
        let regex = Regex::new(&format!("^(?:{})", source))?;
        Ok(Self { source, regex })
    }
}

impl Matcher for RegexRule {
    fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    fn source(&self) -> &str {
        &self.source
    }
}
