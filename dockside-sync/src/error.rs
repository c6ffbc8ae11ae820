//! Error types for dockside-sync.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from mirror operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Bad call contract: empty, identical or nested roots.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `meta.json` exists but cannot be parsed; the record is left alone.
    #[error("malformed context metadata at {path}: {message}")]
    MalformedMeta { path: PathBuf, message: String },
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
