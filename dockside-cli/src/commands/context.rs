//! `dockside context`: one-shot mirror passes and the background watcher.

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use serde::Serialize;

use dockside_core::Config;
use dockside_sync::{pipeline, ContextRoots, Direction, SyncReport};
use dockside_watch::{StartMode, WatcherStatus};

#[derive(Subcommand, Debug)]
pub enum ContextCommand {
    /// Run one mirror pass between the host and sandbox context stores.
    Sync(SyncArgs),

    /// Manage the background context watcher.
    Watch {
        #[command(subcommand)]
        command: WatchCommand,
    },
}

impl ContextCommand {
    pub fn is_foreground_watch(&self) -> bool {
        matches!(
            self,
            ContextCommand::Watch {
                command: WatchCommand::Start { foreground: true }
            }
        )
    }
}

#[derive(Subcommand, Debug)]
pub enum WatchCommand {
    /// Start the watcher (detached unless --foreground).
    Start {
        /// Block in this terminal instead of detaching.
        #[arg(long)]
        foreground: bool,
    },
    /// Stop the watcher. Without --pid every watcher process is stopped.
    Stop {
        #[arg(long)]
        pid: Option<u32>,
    },
    /// Report whether a watcher is running.
    Status {
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
}

// ---------------------------------------------------------------------------
// Direction argument
// ---------------------------------------------------------------------------

/// `--direction` value: one direction, or a merge of both stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirectionArg {
    #[default]
    HostToSandbox,
    SandboxToHost,
    Both,
}

impl FromStr for DirectionArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "both" => Ok(DirectionArg::Both),
            other => match other.parse::<Direction>()? {
                Direction::HostToSandbox => Ok(DirectionArg::HostToSandbox),
                Direction::SandboxToHost => Ok(DirectionArg::SandboxToHost),
            },
        }
    }
}

impl fmt::Display for DirectionArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectionArg::HostToSandbox => write!(f, "{}", Direction::HostToSandbox),
            DirectionArg::SandboxToHost => write!(f, "{}", Direction::SandboxToHost),
            DirectionArg::Both => f.write_str("both"),
        }
    }
}

/// Arguments for `dockside context sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// host-to-sandbox, sandbox-to-host, or both (merge; nothing is deleted).
    #[arg(long, default_value_t = DirectionArg::HostToSandbox)]
    pub direction: DirectionArg,

    /// Count what would change without touching either store.
    #[arg(long)]
    pub dry_run: bool,
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub fn run(command: ContextCommand) -> Result<u8> {
    let cfg = Config::load().context("failed to load dockside configuration")?;
    match command {
        ContextCommand::Sync(args) => sync(&cfg, args),
        ContextCommand::Watch { command } => watch(&cfg, command),
    }
}

fn sync(cfg: &Config, args: SyncArgs) -> Result<u8> {
    let roots = ContextRoots::from_config(cfg);
    let reports = match args.direction {
        DirectionArg::Both => pipeline::run_both(&roots, &cfg.context_name, args.dry_run)
            .context("context sync both failed")?,
        single => {
            let direction = match single {
                DirectionArg::SandboxToHost => Direction::SandboxToHost,
                _ => Direction::HostToSandbox,
            };
            vec![pipeline::run(&roots, &cfg.context_name, direction, args.dry_run)
                .with_context(|| format!("context sync {direction} failed"))?]
        }
    };
    for report in &reports {
        print_report(report, args.dry_run);
    }
    Ok(if reports.iter().all(SyncReport::is_success) { 0 } else { 1 })
}

fn print_report(report: &SyncReport, dry_run: bool) {
    let prefix = if dry_run { "[dry-run] " } else { "" };
    let marker = if report.is_success() {
        "✓".green().bold()
    } else {
        "✗".red().bold()
    };
    println!(
        "{prefix}{marker} {}{}: {} synced, {} unchanged, {} deleted, {} skipped, {} errors",
        report.direction,
        if report.merge { " (merge)" } else { "" },
        report.synced,
        report.unchanged,
        report.deleted,
        report.skipped,
        report.errors,
    );
    for failure in &report.failures {
        println!("  ✗  {}: {}", failure.hash, failure.message);
    }
}

#[derive(Serialize)]
struct WatchStatusJson {
    running: bool,
    pid: Option<u32>,
    stale_pid_file: bool,
    log: String,
}

fn watch(cfg: &Config, command: WatchCommand) -> Result<u8> {
    match command {
        WatchCommand::Start { foreground } => {
            let mode = if foreground {
                StartMode::Foreground
            } else {
                StartMode::Background
            };
            let handle =
                dockside_watch::start(cfg, mode).context("failed to start context watcher")?;
            if mode == StartMode::Background {
                println!(
                    "context watcher started (pid {}), logging to {}",
                    handle.pid,
                    dockside_watch::paths::log_path(cfg).display()
                );
            }
        }
        WatchCommand::Stop { pid } => {
            let stopped = dockside_watch::stop(cfg, pid).context("failed to stop context watcher")?;
            if stopped.is_empty() {
                println!("context watcher is not running");
            } else {
                let pids: Vec<String> = stopped.iter().map(u32::to_string).collect();
                println!("stopped context watcher (pid {})", pids.join(", "));
            }
        }
        WatchCommand::Status { json } => {
            let status = dockside_watch::status(cfg);
            if json {
                let payload = WatchStatusJson {
                    running: matches!(status, WatcherStatus::Running { .. }),
                    pid: match status {
                        WatcherStatus::Running { pid } | WatcherStatus::Stale { pid } => Some(pid),
                        WatcherStatus::NotRunning => None,
                    },
                    stale_pid_file: matches!(status, WatcherStatus::Stale { .. }),
                    log: dockside_watch::paths::log_path(cfg).display().to_string(),
                };
                println!(
                    "{}",
                    serde_json::to_string_pretty(&payload)
                        .context("failed to render watcher status JSON")?
                );
                return Ok(0);
            }
            match status {
                WatcherStatus::Running { pid } => {
                    println!("{} context watcher running (pid {pid})", "●".green())
                }
                WatcherStatus::Stale { pid } => println!(
                    "{} context watcher not running (stale pid file names {pid})",
                    "●".yellow()
                ),
                WatcherStatus::NotRunning => {
                    println!("{} context watcher not running", "●".bright_black())
                }
            }
        }
    }
    Ok(0)
}
