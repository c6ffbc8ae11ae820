use std::fs;
use std::path::{Component, Path};
use std::time::Instant;

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use dockside_sync::{pipeline, ContextRoots, Direction};

use crate::error::{io_err, WatchError};
use crate::paths::EVENT_QUEUE_CAPACITY;
use crate::queue::{self, QueueReceiver, QueueSender};

const NO_WATCHER_HINT: &str =
    "raise fs.inotify.max_user_watches / max_user_instances, or run `dockside context sync` manually";

/// Build a tokio runtime and block the current thread on [`run`].
pub fn start_blocking(roots: ContextRoots, reserved: String) -> Result<(), WatchError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(roots, reserved))
}

/// Watch both context roots and mirror in the matching direction until
/// Ctrl-C or SIGTERM.
pub async fn run(roots: ContextRoots, reserved: String) -> Result<(), WatchError> {
    let roots = prepare_roots(&roots)?;
    let (tx, rx) = queue::channel(EVENT_QUEUE_CAPACITY);

    let _watcher = spawn_watcher(&roots, tx.clone())?;
    tracing::info!(
        host = %roots.host.display(),
        sandbox = %roots.sandbox.display(),
        "context watcher started",
    );

    // Converge once up front to pick up changes made while nobody watched.
    tx.push(Direction::HostToSandbox);
    drop(tx);

    tokio::select! {
        result = sync_worker(roots, reserved, rx) => result,
        reason = shutdown_signal() => {
            tracing::info!("received {reason}, stopping context watcher");
            Ok(())
        }
    }
}

/// Create missing roots and return their canonical form, so event paths
/// (which FSEvents reports as real paths) match `starts_with` checks.
fn prepare_roots(roots: &ContextRoots) -> Result<ContextRoots, WatchError> {
    Ok(ContextRoots {
        host: prepare_root(&roots.host)?,
        sandbox: prepare_root(&roots.sandbox)?,
    })
}

fn prepare_root(root: &Path) -> Result<std::path::PathBuf, WatchError> {
    fs::create_dir_all(root).map_err(|e| io_err(root, e))?;
    fs::canonicalize(root).map_err(|e| io_err(root, e))
}

fn spawn_watcher(roots: &ContextRoots, tx: QueueSender) -> Result<RecommendedWatcher, WatchError> {
    let callback_roots = roots.clone();
    let mut watcher = recommended_watcher(move |event: notify::Result<Event>| match event {
        Ok(event) => {
            for direction in directions_for_event(&event, &callback_roots) {
                if !tx.push(direction) {
                    return;
                }
            }
        }
        Err(err) => tracing::warn!(error = %err, "watcher event error"),
    })
    .map_err(no_watcher)?;

    for root in [&roots.host, &roots.sandbox] {
        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(no_watcher)?;
        tracing::debug!(path = %root.display(), "watching context root");
    }
    Ok(watcher)
}

/// Register a throwaway watcher on both roots and drop it, so a caller can
/// report [`WatchError::NoWatcherAvailable`] before committing to a
/// detached process.
pub fn check_watcher_available(roots: &ContextRoots) -> Result<(), WatchError> {
    let roots = prepare_roots(roots)?;
    let mut watcher = recommended_watcher(|_: notify::Result<Event>| {}).map_err(no_watcher)?;
    for root in [&roots.host, &roots.sandbox] {
        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(no_watcher)?;
    }
    Ok(())
}

fn no_watcher(err: notify::Error) -> WatchError {
    match err.kind {
        notify::ErrorKind::Io(_) | notify::ErrorKind::MaxFilesWatch | notify::ErrorKind::Generic(_) => {
            WatchError::NoWatcherAvailable {
                reason: err.to_string(),
                remediation: NO_WATCHER_HINT,
            }
        }
        _ => WatchError::Notify(err),
    }
}

async fn sync_worker(
    roots: ContextRoots,
    reserved: String,
    mut rx: QueueReceiver,
) -> Result<(), WatchError> {
    while let Some(direction) = rx.next().await {
        let started = Instant::now();
        let roots = roots.clone();
        let reserved = reserved.clone();
        let result =
            tokio::task::spawn_blocking(move || pipeline::run(&roots, &reserved, direction, false))
                .await
                .map_err(|err| WatchError::Process(format!("sync task join error: {err}")))?;

        match result {
            Ok(report) if report.is_success() => {
                if report.changed() {
                    tracing::info!(
                        %direction,
                        synced = report.synced,
                        deleted = report.deleted,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "context mirror pass completed",
                    );
                }
            }
            Ok(report) => tracing::warn!(
                %direction,
                errors = report.errors,
                synced = report.synced,
                "context mirror pass completed with errors",
            ),
            Err(err) => tracing::error!(%direction, error = %err, "context mirror pass failed"),
        }
    }
    Err(WatchError::ChannelClosed("watch event queue"))
}

#[cfg(unix)]
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => tokio::select! {
            _ = tokio::signal::ctrl_c() => "ctrl-c",
            _ = term.recv() => "SIGTERM",
        },
        Err(err) => {
            tracing::warn!(error = %err, "cannot install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            "ctrl-c"
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "ctrl-c"
}

// ---------------------------------------------------------------------------
// Event mapping
// ---------------------------------------------------------------------------

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(_) | EventKind::Any
    )
}

/// Direction a change at `path` calls for, if any.
///
/// Paths inside dot-prefixed staging directories are the mirror's own
/// writes in flight and map to nothing.
pub fn direction_for_path(path: &Path, roots: &ContextRoots) -> Option<Direction> {
    let (direction, rel) = if let Ok(rel) = path.strip_prefix(&roots.host) {
        (Direction::HostToSandbox, rel)
    } else if let Ok(rel) = path.strip_prefix(&roots.sandbox) {
        (Direction::SandboxToHost, rel)
    } else {
        return None;
    };
    let in_staging = rel.components().any(|c| match c {
        Component::Normal(name) => name.to_string_lossy().starts_with('.'),
        _ => false,
    });
    (!in_staging).then_some(direction)
}

fn directions_for_event(event: &Event, roots: &ContextRoots) -> Vec<Direction> {
    if !is_relevant_event_kind(&event.kind) {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(2);
    for path in &event.paths {
        if let Some(direction) = direction_for_path(path, roots) {
            if !out.contains(&direction) {
                out.push(direction);
            }
        }
    }
    out
}
