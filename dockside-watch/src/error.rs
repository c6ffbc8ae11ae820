use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the context watcher and its process management.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("no filesystem watcher available: {reason}\n  hint: {remediation}")]
    NoWatcherAvailable {
        reason: String,
        remediation: &'static str,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("sync error: {0}")]
    Sync(#[from] dockside_sync::SyncError),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("watcher process error: {0}")]
    Process(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> WatchError {
    WatchError::Io {
        path: path.into(),
        source,
    }
}
