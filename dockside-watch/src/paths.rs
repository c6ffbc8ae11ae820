use std::path::PathBuf;

use dockside_core::Config;

pub const WATCHER_PID_FILE: &str = "watcher.pid";
pub const WATCHER_LOG: &str = "watcher.log";

/// Arguments the background start passes to the re-executed binary.
pub const FOREGROUND_ARGS: &[&str] = &["context", "watch", "start", "--foreground"];

/// Command-line fragment `stop` matches when no pid is given.
pub const PROCESS_PATTERN: &str = "context watch start";

/// Set on the re-executed child so it detaches into its own session.
pub const DETACH_ENV: &str = "DOCKSIDE_WATCH_DETACHED";

/// Capacity of the event channel between notify and the sync worker.
pub const EVENT_QUEUE_CAPACITY: usize = 64;

pub fn pid_file_path(cfg: &Config) -> PathBuf {
    cfg.run_dir().join(WATCHER_PID_FILE)
}

pub fn log_path(cfg: &Config) -> PathBuf {
    cfg.logs_dir().join(WATCHER_LOG)
}
