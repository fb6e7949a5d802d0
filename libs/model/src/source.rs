//! Loading desired state from the filesystem.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::ConfigurationError;
use crate::types::DesiredState;
use crate::validate::parse_document;

/// Where a loaded desired state came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Parsed from the document at this path.
    File(PathBuf),
    /// No document existed; the built-in baseline was used.
    Default,
}

/// Result of [`ConfigSource::load`].
#[derive(Debug, Clone)]
pub struct Loaded {
    pub desired: DesiredState,
    pub origin: Origin,
}

/// Desired-state document source.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    path: PathBuf,
}

impl ConfigSource {
    /// Default document location, relative to the working directory.
    pub const DEFAULT_PATH: &'static str = "infrastructure/config.yaml";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document.
    ///
    /// A missing file is not an error: the built-in baseline is returned and
    /// a warning is emitted. Any other read failure, a malformed document or
    /// an invariant violation is fatal.
    pub fn load(&self) -> Result<Loaded, ConfigurationError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    path = %self.path.display(),
                    "Configuration file not found, using built-in default"
                );
                return Ok(Loaded {
                    desired: DesiredState::baseline(),
                    origin: Origin::Default,
                });
            }
            Err(source) => {
                return Err(ConfigurationError::Unreadable {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let desired = parse_document(&text, &self.path.display().to_string())?;
        info!(
            path = %self.path.display(),
            project = %desired.project,
            service_count = desired.services.len(),
            "Configuration loaded"
        );

        Ok(Loaded {
            desired,
            origin: Origin::File(self.path.clone()),
        })
    }

    /// Parse an in-memory document, such as one read from stdin.
    pub fn parse_str(text: &str) -> Result<DesiredState, ConfigurationError> {
        parse_document(text, "<stdin>")
    }
}

impl Default for ConfigSource {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PATH)
    }
}
