//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request path
//!     → classifier.rs (ordered rule scan)
//!     → matcher.rs (evaluate a single rule)
//!     → Return: Role::Read (static) or Role::Write
//!
//! Rule Compilation (at load/reload):
//!     read_rules[]
//!     → Compile anchored regexes, keeping configuration order
//!     → Freeze inside the config snapshot
//! ```
//!
//! # Design Decisions
//! - Rules compiled once per snapshot, immutable at runtime
//! - Deterministic: same input always matches same rule
//! - First match wins (configuration order, not specificity)

pub mod classifier;
pub mod matcher;

pub use classifier::{PathClassifier, RuleError};
pub use matcher::{Matcher, RegexRule};
