//! `dockside check`: silent, rate-limited version advisory.
//!
//! Meant to run before every command from a shell hook, so it never fails:
//! whatever goes wrong is logged at debug level and the exit code stays 0.

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use colored::Colorize;

use dockside_core::Config;
use dockside_detect::detect_host;
use dockside_update::collaborators::HttpIndex;
use dockside_update::precheck;

#[derive(Args, Debug)]
pub struct CheckArgs {}

impl CheckArgs {
    pub fn run(self) -> Result<u8> {
        let cfg = match Config::load() {
            Ok(cfg) => cfg,
            Err(err) => {
                tracing::debug!(error = %err, "check skipped: configuration unreadable");
                return Ok(0);
            }
        };
        let host = match detect_host() {
            Ok(host) => host,
            Err(err) => {
                tracing::debug!(error = %err, "check skipped: unknown host");
                return Ok(0);
            }
        };
        // Lima installs update through the VM's package manager.
        if host.platform.is_macos() {
            return Ok(0);
        }

        let index = HttpIndex::new(cfg.index_url.clone());
        if let Some(advisory) = precheck(
            &cfg.state_dir,
            cfg.check_interval,
            host.arch,
            &index,
            Utc::now(),
        ) {
            eprintln!("{} {advisory}", "!".yellow().bold());
        }
        Ok(0)
    }
}
