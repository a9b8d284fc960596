//! Error taxonomy for the fetch-and-execute pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Terminal failure of a single run. Every variant maps to one response
/// category at the HTTP boundary.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("repository not permitted: {0}")]
    SourceNotPermitted(String),

    #[error("failed to fetch script: {0}")]
    FetchFailed(String),

    #[error("timed out fetching script after {0} ms")]
    FetchTimeout(u64),

    #[error("failed to stage script")]
    StagingFailed(#[source] StagingError),

    #[error("script failed: {0}")]
    ExecutionFailed(String),

    #[error("script timed out after {0} ms")]
    ExecutionTimeout(u64),
}

impl RunError {
    /// Stable category name exposed to callers.
    pub fn category(&self) -> &'static str {
        match self {
            RunError::InvalidRequest(_) => "invalid_request",
            RunError::SourceNotPermitted(_) => "source_not_permitted",
            RunError::FetchFailed(_) => "fetch_failed",
            RunError::FetchTimeout(_) => "fetch_timeout",
            RunError::StagingFailed(_) => "staging_failed",
            RunError::ExecutionFailed(_) => "execution_failed",
            RunError::ExecutionTimeout(_) => "execution_timeout",
        }
    }
}

/// Filesystem errors from the staging store. These carry paths and are
/// only ever logged.
#[derive(Debug, Error)]
pub enum StagingError {
    #[error("create staging dir {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cleanup {path}: {source}")]
    CleanupFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staging_failure_message_hides_path() {
        let err = RunError::StagingFailed(StagingError::Write {
            path: PathBuf::from("/var/tmp/scriptrun/script-abc"),
            source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        });
        assert_eq!(err.to_string(), "failed to stage script");
        assert_eq!(err.category(), "staging_failed");
    }
}
