use chrono::Utc;

use dockside_core::state::read_version_marker;
use dockside_core::version_is_greater;

use super::{confirm, ReconcileStep, StepContext, StepStatus};
use crate::bundle::{BundleInstaller, KEEP_VERSIONS};
use crate::collaborators::wait_for_socket;
use crate::error::UpdateError;
use crate::oracle;

/// Rootless daemon binary bundle (Linux / WSL2 only).
#[derive(Debug, Default)]
pub struct BundleStep;

impl ReconcileStep for BundleStep {
    fn name(&self) -> &'static str {
        "docker bundle"
    }

    fn run(&self, ctx: &StepContext<'_>) -> Result<StepStatus, UpdateError> {
        let cfg = ctx.cfg;
        if ctx.host.platform.is_macos() {
            return Ok(StepStatus::Skipped("daemon runs inside the Lima VM".into()));
        }
        let Some(installed) = read_version_marker(&cfg.state_dir)? else {
            return Ok(StepStatus::Skipped(
                "no bundle installed yet; run `dockside setup`".into(),
            ));
        };

        // A dry run must not even touch the check-state file.
        let looked_up = if ctx.options.dry_run {
            ctx.tools.index.latest_version(ctx.host.arch)
        } else {
            oracle::latest_version(ctx.tools.index, ctx.host.arch, &cfg.state_dir, Utc::now())
        };
        let latest = match looked_up {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(error = %err, "version index unavailable");
                return Ok(StepStatus::Skipped(format!(
                    "could not reach version index ({err}); installed {installed}"
                )));
            }
        };

        if !version_is_greater(&installed, &latest) {
            return Ok(StepStatus::UpToDate(installed));
        }
        if ctx.options.dry_run {
            return Ok(StepStatus::WouldUpdate(format!(
                "would install {latest} (installed {installed})"
            )));
        }
        if !confirm(ctx, &format!("Upgrade docker {installed} -> {latest}?"))? {
            return Err(UpdateError::UserCancelled);
        }

        let installer = BundleInstaller::from_config(cfg);
        installer.install(ctx.tools.bundles, &latest, ctx.host.arch)?;
        ctx.tools.services.restart(&cfg.unit_name)?;
        if !wait_for_socket(ctx.tools.sockets, &cfg.socket_path, cfg.socket_wait) {
            return Ok(StepStatus::failed(
                format!(
                    "docker {latest} installed but {} never appeared",
                    cfg.socket_path.display()
                ),
                format!("journalctl --user -u {}", cfg.unit_name),
            ));
        }
        let pruned = installer.prune(KEEP_VERSIONS)?;
        if !pruned.is_empty() {
            tracing::info!(versions = ?pruned, "pruned old bundles");
        }
        Ok(StepStatus::Updated(format!("{installed} -> {latest}")))
    }
}
