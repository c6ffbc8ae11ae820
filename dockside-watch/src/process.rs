//! Watcher process lifecycle: start (foreground or detached), stop, status.
//!
//! The pid file at `<state_dir>/run/watcher.pid` is the handle a detached
//! watcher leaves behind. It is advisory: `stop` without a pid also sweeps
//! every process whose command line looks like a watcher, to clean up after
//! crashes that lost the file.

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;

use dockside_core::fsutil::atomic_write;
use dockside_core::Config;
use dockside_sync::ContextRoots;

use crate::error::{io_err, WatchError};
use crate::log_rotation;
use crate::paths::{log_path, pid_file_path, DETACH_ENV, FOREGROUND_ARGS, PROCESS_PATTERN};

const STARTUP_POLLS: u32 = 10;
const STARTUP_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Block the caller on the watch loop.
    Foreground,
    /// Re-execute the current binary detached and return its pid.
    Background,
}

/// A running (or just finished, for foreground) watcher process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherHandle {
    pub pid: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherStatus {
    Running { pid: u32 },
    /// The pid file names a process that is gone.
    Stale { pid: u32 },
    NotRunning,
}

/// Start the context watcher.
pub fn start(cfg: &Config, mode: StartMode) -> Result<WatcherHandle, WatchError> {
    let own = std::process::id();
    if let WatcherStatus::Running { pid } = status(cfg) {
        if pid != own {
            return Err(WatchError::Process(format!(
                "a context watcher is already running (pid {pid}); stop it with `dockside context watch stop`"
            )));
        }
    }
    match mode {
        StartMode::Foreground => run_foreground(cfg),
        StartMode::Background => spawn_background(cfg),
    }
}

fn run_foreground(cfg: &Config) -> Result<WatcherHandle, WatchError> {
    if std::env::var_os(DETACH_ENV).is_some() {
        detach_session();
    }
    init_tracing();

    let pid = std::process::id();
    let pid_file = pid_file_path(cfg);
    write_pid_file(&pid_file, pid)?;

    let result = crate::runtime::start_blocking(
        ContextRoots::from_config(cfg),
        cfg.context_name.clone(),
    );

    if read_pid_file(&pid_file) == Some(pid) {
        let _ = fs::remove_file(&pid_file);
    }
    result.map(|()| WatcherHandle { pid })
}

fn spawn_background(cfg: &Config) -> Result<WatcherHandle, WatchError> {
    let log = log_path(cfg);
    if let Some(dir) = log.parent() {
        fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    log_rotation::rotate_watcher_log(&log);

    let stdout = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log)
        .map_err(|e| io_err(&log, e))?;
    let stderr = stdout.try_clone().map_err(|e| io_err(&log, e))?;
    let exe = std::env::current_exe().map_err(|e| io_err("current executable", e))?;

    // Fail here rather than in a detached child nobody is watching.
    crate::runtime::check_watcher_available(&ContextRoots::from_config(cfg))?;

    let mut child = Command::new(&exe)
        .args(FOREGROUND_ARGS)
        .env(DETACH_ENV, "1")
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .spawn()
        .map_err(|e| io_err(&exe, e))?;

    let pid = child.id();
    write_pid_file(&pid_file_path(cfg), pid)?;
    if let Some(exit) = exited_early(&mut child)? {
        let _ = fs::remove_file(pid_file_path(cfg));
        return Err(WatchError::Process(format!(
            "context watcher exited during startup ({exit}); see {}",
            log.display()
        )));
    }
    tracing::info!(pid, log = %log.display(), "context watcher started in background");
    Ok(WatcherHandle { pid })
}

/// Stop the watcher named by `pid`, or every watcher process when `None`.
/// Returns the pids that were signalled.
pub fn stop(cfg: &Config, pid: Option<u32>) -> Result<Vec<u32>, WatchError> {
    let pid_file = pid_file_path(cfg);
    let recorded = read_pid_file(&pid_file);

    let targets = match pid {
        Some(pid) => {
            if recorded != Some(pid) && !find_watcher_processes()?.contains(&pid) {
                return Err(WatchError::Process(format!(
                    "pid {pid} is not a context watcher; refusing to signal it"
                )));
            }
            vec![pid]
        }
        None => {
            let mut pids = find_watcher_processes()?;
            if let Some(recorded) = recorded.filter(|p| pid_alive(*p)) {
                pids.push(recorded);
            }
            pids.sort_unstable();
            pids.dedup();
            pids
        }
    };

    let mut stopped = Vec::new();
    for target in targets {
        match terminate(target) {
            Ok(()) => {
                tracing::info!(pid = target, "sent SIGTERM to context watcher");
                stopped.push(target);
            }
            Err(err) if pid.is_some() => return Err(err),
            Err(err) => tracing::warn!(pid = target, error = %err, "could not stop process"),
        }
    }

    if pid.is_none() || recorded == pid {
        match fs::remove_file(&pid_file) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(&pid_file, e)),
        }
    }
    Ok(stopped)
}

pub fn status(cfg: &Config) -> WatcherStatus {
    match read_pid_file(&pid_file_path(cfg)) {
        Some(pid) if pid_alive(pid) => WatcherStatus::Running { pid },
        Some(pid) => WatcherStatus::Stale { pid },
        None => WatcherStatus::NotRunning,
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn write_pid_file(path: &Path, pid: u32) -> Result<(), WatchError> {
    atomic_write(path, format!("{pid}\n").as_bytes()).map_err(|e| match e {
        dockside_core::CoreError::Io { path, source } => WatchError::Io { path, source },
        other => WatchError::Process(other.to_string()),
    })
}

/// Poll a freshly spawned child for a short grace period.
fn exited_early(child: &mut Child) -> Result<Option<ExitStatus>, WatchError> {
    for _ in 0..STARTUP_POLLS {
        if let Some(exit) = child.try_wait().map_err(|e| io_err("watcher child", e))? {
            return Ok(Some(exit));
        }
        std::thread::sleep(STARTUP_POLL_INTERVAL);
    }
    Ok(None)
}

fn read_pid_file(path: &Path) -> Option<u32> {
    fs::read_to_string(path)
        .ok()
        .and_then(|raw| raw.trim().parse::<u32>().ok())
        .filter(|pid| *pid > 0)
}

/// `pgrep -f` over watcher command lines, excluding this process.
fn find_watcher_processes() -> Result<Vec<u32>, WatchError> {
    let output = match Command::new("pgrep").args(["-f", PROCESS_PATTERN]).output() {
        Ok(output) => output,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::warn!("pgrep not found; only the pid file is consulted");
            return Ok(Vec::new());
        }
        Err(e) => return Err(io_err("pgrep", e)),
    };
    // Exit status 1 means "no match".
    if !output.status.success() && output.status.code() != Some(1) {
        return Err(WatchError::Process(format!(
            "pgrep failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(parse_pids(&String::from_utf8_lossy(&output.stdout), std::process::id()))
}

fn parse_pids(stdout: &str, exclude: u32) -> Vec<u32> {
    stdout
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .filter(|pid| *pid != exclude)
        .collect()
}

fn pid_alive(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

fn terminate(pid: u32) -> Result<(), WatchError> {
    if pid == 0 || pid > i32::MAX as u32 {
        return Err(WatchError::Process(format!("invalid pid {pid}")));
    }
    let rc = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
    if rc == 0 {
        Ok(())
    } else {
        Err(WatchError::Process(format!(
            "kill({pid}, SIGTERM) failed: {}",
            std::io::Error::last_os_error()
        )))
    }
}

fn detach_session() {
    unsafe {
        libc::setsid();
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
