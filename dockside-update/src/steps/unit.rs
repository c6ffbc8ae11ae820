use std::fs;
use std::io::ErrorKind;

use similar::TextDiff;

use dockside_core::fsutil::atomic_write;

use super::{ReconcileStep, StepContext, StepStatus};
use crate::collaborators::wait_for_socket;
use crate::error::{io_err, UpdateError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitState {
    UpToDate,
    NeedsUpdate { installed: String },
    Missing,
}

/// Compare the installed unit text with the expected rendering.
pub fn classify_unit(installed: Option<&str>, expected: &str) -> UnitState {
    match installed {
        None => UnitState::Missing,
        Some(text) if normalize(text) == normalize(expected) => UnitState::UpToDate,
        Some(text) => UnitState::NeedsUpdate {
            installed: text.to_string(),
        },
    }
}

fn normalize(text: &str) -> String {
    text.replace("\r\n", "\n").trim_end().to_string()
}

/// systemd user unit for the rootless daemon (Linux / WSL2).
#[derive(Debug, Default)]
pub struct UnitStep;

impl ReconcileStep for UnitStep {
    fn name(&self) -> &'static str {
        "service unit"
    }

    fn run(&self, ctx: &StepContext<'_>) -> Result<StepStatus, UpdateError> {
        let cfg = ctx.cfg;
        let expected = ctx.renderer.render_unit(cfg)?;
        let installed = match fs::read_to_string(&cfg.unit_path) {
            Ok(text) => Some(text),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(io_err(&cfg.unit_path, e)),
        };

        let installed = match classify_unit(installed.as_deref(), &expected) {
            UnitState::UpToDate => return Ok(StepStatus::UpToDate(cfg.unit_name.clone())),
            UnitState::Missing => {
                return Ok(StepStatus::failed(
                    format!("{} is not installed", cfg.unit_path.display()),
                    "run `dockside setup`",
                ))
            }
            UnitState::NeedsUpdate { installed } => installed,
        };

        if ctx.options.dry_run {
            let diff = TextDiff::from_lines(&installed, &expected)
                .unified_diff()
                .context_radius(2)
                .header("installed", "expected")
                .to_string();
            return Ok(StepStatus::WouldUpdate(format!(
                "would rewrite {} and restart:\n{diff}",
                cfg.unit_name
            )));
        }

        atomic_write(&cfg.unit_path, expected.as_bytes())?;
        ctx.tools.services.daemon_reload()?;
        ctx.tools.services.restart(&cfg.unit_name)?;
        tracing::info!(unit = %cfg.unit_name, "service unit rewritten and restarted");

        if !wait_for_socket(ctx.tools.sockets, &cfg.socket_path, cfg.socket_wait) {
            return Ok(StepStatus::failed(
                format!(
                    "daemon socket {} did not appear within {}s",
                    cfg.socket_path.display(),
                    cfg.socket_wait.timeout().as_secs()
                ),
                format!("journalctl --user -u {}", cfg.unit_name),
            ));
        }
        Ok(StepStatus::Updated(format!("{} rewritten", cfg.unit_name)))
    }
}
