//! Size-based rotation of `watcher.log`, applied before each background start.
//!
//! `watcher.log` → `watcher.log.1` → … → `watcher.log.<MAX_ROTATED_FILES>`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Rotate once the live log reaches 10 MiB.
pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

pub const MAX_ROTATED_FILES: usize = 5;

/// Rotate `log_path` when it is at least `max_bytes` long. Returns whether a
/// rotation happened. A missing log is not an error.
pub fn rotate_if_needed(log_path: &Path, max_bytes: u64, max_files: usize) -> io::Result<bool> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    if size < max_bytes || max_files == 0 {
        return Ok(false);
    }

    match fs::remove_file(numbered(log_path, max_files)) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    for n in (1..max_files).rev() {
        let from = numbered(log_path, n);
        if from.exists() {
            fs::rename(&from, numbered(log_path, n + 1))?;
        }
    }
    // The child opens the log in append mode, so no empty file is needed.
    fs::rename(log_path, numbered(log_path, 1))?;
    Ok(true)
}

/// Best-effort rotation of the watcher log; failures are only logged.
pub fn rotate_watcher_log(log_path: &Path) {
    match rotate_if_needed(log_path, MAX_LOG_BYTES, MAX_ROTATED_FILES) {
        Ok(true) => tracing::info!(path = %log_path.display(), "watcher log rotated"),
        Ok(false) => {}
        Err(err) => tracing::warn!(path = %log_path.display(), error = %err, "log rotation failed"),
    }
}

fn numbered(base: &Path, n: usize) -> PathBuf {
    let name = base
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("watcher.log");
    base.with_file_name(format!("{name}.{n}"))
}
