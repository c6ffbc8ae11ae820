use std::fs;
use std::io::ErrorKind;

use dockside_core::fsutil::atomic_write;
use dockside_core::state::{read_template_hash, write_template_hash};
use dockside_render::template_hash;

use super::{confirm, ReconcileStep, StepContext, StepStatus};
use crate::collaborators::{wait_for_socket, VmState};
use crate::error::{io_err, UpdateError};

/// Lima VM hosting the daemon on macOS.
///
/// The template's content hash decides between an in-place package upgrade
/// and a full rebuild. The stored hash only moves after a rebuild whose socket
/// came up, so a failed rebuild is retried on the next run.
#[derive(Debug, Default)]
pub struct VmStep;

impl ReconcileStep for VmStep {
    fn name(&self) -> &'static str {
        "lima vm"
    }

    fn run(&self, ctx: &StepContext<'_>) -> Result<StepStatus, UpdateError> {
        let cfg = ctx.cfg;
        let vms = ctx.tools.vms;
        let template = ctx.renderer.render_vm_template(cfg, ctx.host.arch)?;
        let hash = template_hash(&template);
        let stored = read_template_hash(&cfg.state_dir)?;
        let state = vms.state(&cfg.vm_name)?;

        let reason = if ctx.options.lima_recreate {
            Some("recreate requested")
        } else if state == VmState::Missing {
            Some("vm does not exist")
        } else if stored.as_deref() != Some(hash.as_str()) {
            Some("template changed")
        } else {
            None
        };

        let Some(reason) = reason else {
            if ctx.options.dry_run {
                return Ok(StepStatus::WouldUpdate(format!(
                    "template unchanged; would upgrade packages in {}",
                    cfg.vm_name
                )));
            }
            if state == VmState::Stopped {
                vms.start(&cfg.vm_name)?;
            }
            vms.upgrade_packages(&cfg.vm_name)?;
            return Ok(StepStatus::UpToDate(
                "template unchanged; packages refreshed".into(),
            ));
        };

        if ctx.options.dry_run {
            return Ok(StepStatus::WouldUpdate(format!(
                "would recreate {} ({reason})",
                cfg.vm_name
            )));
        }
        if state != VmState::Missing
            && !confirm(
                ctx,
                &format!("Recreate VM {} ({reason})? Containers inside it will be lost.", cfg.vm_name),
            )?
        {
            return Err(UpdateError::UserCancelled);
        }

        write_template_if_changed(cfg, &template)?;
        if state == VmState::Running {
            vms.stop(&cfg.vm_name)?;
        }
        if state != VmState::Missing {
            vms.delete(&cfg.vm_name)?;
        }
        vms.create(&cfg.vm_name, &cfg.vm_template_path)?;

        if !wait_for_socket(ctx.tools.sockets, &cfg.vm_socket_path, cfg.vm_wait) {
            return Ok(StepStatus::failed(
                format!(
                    "{} recreated but {} never appeared",
                    cfg.vm_name,
                    cfg.vm_socket_path.display()
                ),
                format!("limactl shell {} journalctl --user -u docker", cfg.vm_name),
            ));
        }
        write_template_hash(&cfg.state_dir, &hash)?;
        tracing::info!(vm = %cfg.vm_name, reason, "lima vm recreated");
        Ok(StepStatus::Updated(format!("{} recreated ({reason})", cfg.vm_name)))
    }
}

fn write_template_if_changed(
    cfg: &dockside_core::Config,
    template: &str,
) -> Result<(), UpdateError> {
    match fs::read_to_string(&cfg.vm_template_path) {
        Ok(existing) if existing == template => return Ok(()),
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(io_err(&cfg.vm_template_path, e)),
    }
    atomic_write(&cfg.vm_template_path, template.as_bytes())?;
    Ok(())
}
