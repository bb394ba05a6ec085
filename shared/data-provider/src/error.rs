use std::path::PathBuf;

use thiserror::Error;

/// Convenient result type used throughout the data plane.
pub type Result<T, E = DataError> = std::result::Result<T, E>;

/// Failures on the data path.
///
/// Configuration problems are detected before any I/O wherever possible.
/// Storage problems are fatal and never retried: a multi-hour run must not
/// proceed over a silently partial read or write.
#[derive(Debug, Error)]
pub enum DataError {
    /// Bad or conflicting operator input.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An operation the requested mode deliberately does not support.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// A weighted source ran dry mid-pass; ends the pass, not the process.
    #[error("source stream {source_index} is exhausted")]
    Exhausted { source_index: usize },

    /// Chunk read or write failure.
    #[error("storage error at {path:?}: {source}")]
    Storage {
        source: std::io::Error,
        path: PathBuf,
    },

    /// A chunk file that exists but does not parse as one.
    #[error("bad chunk file {path:?}: {reason}")]
    Malformed { path: PathBuf, reason: String },
}

impl DataError {
    pub fn storage(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Storage {
            source,
            path: path.into(),
        }
    }

    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
