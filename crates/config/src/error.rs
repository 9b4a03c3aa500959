//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading the routing table or run settings.
///
/// Every variant is fatal for a reconciliation run: it is reported before
/// any network probe or filesystem mutation takes place.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}:{line}: malformed route {content:?} (expected `<domain> <backend>`)", .path.display())]
    MalformedRoute {
        path: PathBuf,
        line: usize,
        content: String,
    },

    #[error("Invalid setting `{field}`: {reason}")]
    InvalidSetting { field: &'static str, reason: String },

    #[error("Argument files nested deeper than {0} levels")]
    ArgFileNesting(usize),
}

impl ConfigError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidSetting {
            field,
            reason: reason.into(),
        }
    }
}
