//! Error taxonomy
//!
//! Every variant of [`BisectError`] is fatal to the run: it unwinds the
//! search and the binary exits nonzero. [`CleanupWarning`] is the one kind
//! that is never propagated; it only reaches the log.

use crate::revision::Revision;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = BisectError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum BisectError {
    /// Fetching or unpacking a snapshot failed.
    #[error("failed to download r{revision}: {message}")]
    Download { revision: Revision, message: String },

    /// The executable is missing or could not be started.
    #[error("failed to launch {}: {source}", path.display())]
    Launch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The external evaluator could not be started. Distinct from a bad
    /// outcome, which is a started evaluator exiting nonzero.
    #[error("failed to start evaluator `{command}`: {source}")]
    EvaluationSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading the answer of an interactive evaluation failed.
    #[error("prompt failed: {0}")]
    Prompt(#[source] std::io::Error),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    /// Revision metadata (latest revision, commit lookup) was unavailable.
    #[error("metadata lookup failed: {0}")]
    Metadata(String),
}

impl BisectError {
    pub fn download(revision: Revision, message: impl Into<String>) -> Self {
        BisectError::Download {
            revision,
            message: message.into(),
        }
    }
}

/// Best-effort cleanup that did not succeed. The resource may already be
/// gone, so these are logged and dropped.
#[derive(Debug, Error)]
pub enum CleanupWarning {
    #[error("could not remove {}: {source}", path.display())]
    RemoveDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not kill process {pid}: {source}")]
    Kill {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("could not remove cached r{revision}: {source}")]
    RemoveArtifact {
        revision: Revision,
        #[source]
        source: std::io::Error,
    },
}

impl CleanupWarning {
    /// Record the warning. Missing resources are expected (the process may
    /// have exited on its own), so those only show up at debug level.
    pub fn log(&self) {
        let already_gone = match self {
            CleanupWarning::RemoveDir { source, .. }
            | CleanupWarning::Kill { source, .. }
            | CleanupWarning::RemoveArtifact { source, .. } => is_already_gone(source),
        };
        if already_gone {
            tracing::debug!(warning = %self, "cleanup target already gone");
        } else {
            tracing::warn!(warning = %self, "cleanup failed");
        }
    }
}

fn is_already_gone(err: &std::io::Error) -> bool {
    if err.kind() == std::io::ErrorKind::NotFound {
        return true;
    }
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::ESRCH)
    }
    #[cfg(not(unix))]
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_error_mentions_revision() {
        let err = BisectError::download(Revision(1234), "404 Not Found");
        assert_eq!(err.to_string(), "failed to download r1234: 404 Not Found");
    }

    #[test]
    fn test_not_found_counts_as_already_gone() {
        let err = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert!(is_already_gone(&err));
        let err = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(!is_already_gone(&err));
    }
}
