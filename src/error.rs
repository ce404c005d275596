//! Error kinds shared across every engine component.
//!
//! Six kinds cover every fallible operation in the engine: `Timeout`, `IO`,
//! `Protocol`, `Validation`, `Policy`, `LockContention`.

use std::path::PathBuf;

/// The crate-wide error type. Fallible public APIs return `Result<T, FaubError>`.
#[derive(Debug, thiserror::Error)]
pub enum FaubError {
    /// A blocking read/write on the framed channel exceeded its deadline.
    #[error("timed out after {0:?} waiting on channel")]
    Timeout(std::time::Duration),

    /// An open/stat/link/unlink/rename/write/read failure.
    #[error("io error on {path:?}: {source}")]
    Io {
        /// The path the operation concerned, if any.
        path: Option<PathBuf>,
        /// The underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A client-side error report, a malformed frame, or a phase-order violation.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A config parse error, a bad value, or a profile name collision.
    #[error("validation error on {key}: {reason}")]
    Validation {
        /// The offending config key.
        key: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The failsafe gate refused to prune; the run continues into backup.
    #[error("policy: {0}")]
    Policy(String),

    /// Another live process already holds the profile's lock.
    #[error("profile is locked by pid {pid} since {since:?}")]
    LockContention {
        /// The pid holding the lock.
        pid: i32,
        /// When that pid acquired the lock.
        since: std::time::SystemTime,
    },
}

impl FaubError {
    /// Wrap an [`std::io::Error`] with the path it concerned.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FaubError::Io {
            path: Some(path.into()),
            source,
        }
    }

    /// Wrap an [`std::io::Error`] with no associated path.
    pub fn io_bare(source: std::io::Error) -> Self {
        FaubError::Io { path: None, source }
    }
}

impl From<std::io::Error> for FaubError {
    fn from(source: std::io::Error) -> Self {
        FaubError::io_bare(source)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FaubError>;

/// Accumulates non-fatal per-file errors encountered during a single backup
/// run (scan, transfer, reconstitution) without aborting the run.
///
/// Individual file errors are collected and logged, and a per-file error
/// count is reported at the end; the run is not aborted unless a rename or
/// the overall protocol fails.
#[derive(Debug, Default, Clone)]
pub struct ErrorTally {
    count: u64,
    last: Option<String>,
}

impl ErrorTally {
    /// Create an empty tally.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one non-fatal error, logging it at `warn` level.
    pub fn record(&mut self, context: impl std::fmt::Display) {
        self.count += 1;
        let message = context.to_string();
        log::warn!("{message}");
        self.last = Some(message);
    }

    /// How many errors have been recorded so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// The most recently recorded error message, if any.
    pub fn last(&self) -> Option<&str> {
        self.last.as_deref()
    }

    /// Whether any errors were recorded.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}
