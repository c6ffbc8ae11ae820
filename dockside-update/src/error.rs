//! Error types for dockside-update.

use std::path::PathBuf;

use thiserror::Error;

/// All errors raised while reconciling.
///
/// Inside a step these become a failed step outcome; only
/// [`UpdateError::Precondition`] ends a run before any step executes.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Remote index or download unreachable.
    #[error("network error: {0}")]
    Network(String),

    /// Remote content did not have the expected shape.
    #[error("parse error: {0}")]
    Parse(String),

    /// A downloaded bundle is missing required binaries.
    #[error("verification failed: {0}")]
    Verification(String),

    #[error("cancelled by user")]
    UserCancelled,

    #[error("precondition failed: {message}")]
    Precondition {
        message: String,
        remediation: String,
    },

    /// An external tool exited unsuccessfully.
    #[error("`{program}` failed: {message}")]
    Command { program: String, message: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Core(#[from] dockside_core::CoreError),

    #[error(transparent)]
    Render(#[from] dockside_render::RenderError),

    #[error(transparent)]
    Sync(#[from] dockside_sync::SyncError),
}

impl UpdateError {
    /// Operator command most likely to fix the error, when there is one.
    pub fn remediation(&self) -> Option<String> {
        match self {
            UpdateError::Network(_) => {
                Some("check network access to download.docker.com and re-run `dockside update`".into())
            }
            UpdateError::Verification(_) => {
                Some("re-run `dockside update`; the previous version is still active".into())
            }
            UpdateError::Precondition { remediation, .. } => Some(remediation.clone()),
            UpdateError::Command { program, .. } if program == "systemctl" => {
                Some("inspect `systemctl --user status` and `journalctl --user -xe`".into())
            }
            UpdateError::Command { program, .. } if program == "limactl" => {
                Some("inspect `limactl list` and the VM logs under ~/.lima".into())
            }
            _ => None,
        }
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> UpdateError {
    UpdateError::Io {
        path: path.into(),
        source,
    }
}
