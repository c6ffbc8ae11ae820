use std::fs;
use std::path::PathBuf;

use super::{ReconcileStep, StepContext, StepStatus};
use crate::collaborators::VmState;
use crate::error::{io_err, UpdateError};

/// Leftovers from earlier installs: configured legacy paths and, on macOS,
/// the previous Lima VM. Only runs after verification succeeded.
#[derive(Debug, Default)]
pub struct LegacyCleanupStep;

enum Leftover {
    Path(PathBuf),
    Vm { name: String, state: VmState },
}

impl Leftover {
    fn describe(&self) -> String {
        match self {
            Leftover::Path(path) => path.display().to_string(),
            Leftover::Vm { name, .. } => format!("vm {name}"),
        }
    }
}

impl LegacyCleanupStep {
    fn leftovers(ctx: &StepContext<'_>) -> Result<Vec<Leftover>, UpdateError> {
        let cfg = ctx.cfg;
        let mut found: Vec<Leftover> = cfg
            .legacy_paths
            .iter()
            .filter(|p| p.symlink_metadata().is_ok())
            .cloned()
            .map(Leftover::Path)
            .collect();

        if ctx.host.platform.is_macos() {
            if let Some(name) = cfg.legacy_vm_name.as_ref().filter(|n| **n != cfg.vm_name) {
                let state = ctx.tools.vms.state(name)?;
                if state != VmState::Missing {
                    found.push(Leftover::Vm {
                        name: name.clone(),
                        state,
                    });
                }
            }
        }
        Ok(found)
    }
}

impl ReconcileStep for LegacyCleanupStep {
    fn name(&self) -> &'static str {
        "legacy cleanup"
    }

    fn run(&self, ctx: &StepContext<'_>) -> Result<StepStatus, UpdateError> {
        let leftovers = Self::leftovers(ctx)?;
        if leftovers.is_empty() {
            return Ok(StepStatus::UpToDate("nothing to remove".into()));
        }
        let listing: Vec<String> = leftovers.iter().map(Leftover::describe).collect();
        if ctx.options.dry_run {
            return Ok(StepStatus::WouldUpdate(format!(
                "would remove {}",
                listing.join(", ")
            )));
        }

        for leftover in &leftovers {
            match leftover {
                Leftover::Path(path) => {
                    let meta = path.symlink_metadata().map_err(|e| io_err(path, e))?;
                    let removed = if meta.is_dir() {
                        fs::remove_dir_all(path)
                    } else {
                        fs::remove_file(path)
                    };
                    removed.map_err(|e| io_err(path, e))?;
                }
                Leftover::Vm { name, state } => {
                    if *state == VmState::Running {
                        ctx.tools.vms.stop(name)?;
                    }
                    ctx.tools.vms.delete(name)?;
                }
            }
            tracing::info!(item = %leftover.describe(), "removed legacy leftover");
        }
        Ok(StepStatus::Updated(format!("removed {}", listing.join(", "))))
    }
}
