//! Context watcher: a long-lived process that mirrors the host and sandbox
//! docker context stores whenever either one changes.

mod error;
pub mod log_rotation;
pub mod paths;
pub mod process;
pub mod queue;
mod runtime;

pub use error::WatchError;
pub use process::{start, status, stop, StartMode, WatcherHandle, WatcherStatus};
pub use runtime::{check_watcher_available, direction_for_path, run, start_blocking};
