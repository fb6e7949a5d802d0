//! Error types for configuration loading and validation.

use std::path::PathBuf;

use thiserror::Error;

/// A single problem found in a desired-state document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Dotted path of the offending field (`$` for the whole document).
    pub path: String,

    /// What is wrong with it.
    pub message: String,
}

impl Violation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Fatal, pre-run configuration errors.
///
/// Raised before any Cloud API call is made.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The document exists but could not be read.
    #[error("failed to read configuration {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is malformed or violates the model invariants.
    #[error(
        "invalid configuration {document} ({} violation(s)): {}",
        .violations.len(),
        join_violations(.violations)
    )]
    Invalid {
        document: String,
        violations: Vec<Violation>,
    },
}

impl ConfigurationError {
    /// All violations carried by this error (empty for read failures).
    pub fn violations(&self) -> &[Violation] {
        match self {
            ConfigurationError::Invalid { violations, .. } => violations,
            ConfigurationError::Unreadable { .. } => &[],
        }
    }

    /// Returns true if a violation was reported at `path`.
    pub fn has_violation_at(&self, path: &str) -> bool {
        self.violations().iter().any(|v| v.path == path)
    }
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(Violation::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
