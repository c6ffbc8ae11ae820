use dockside_sync::{pipeline, ContextRoots, Direction};

use super::{ReconcileStep, StepContext, StepStatus};
use crate::error::UpdateError;

/// One host-to-sandbox context mirror pass.
#[derive(Debug, Default)]
pub struct MirrorStep;

impl ReconcileStep for MirrorStep {
    fn name(&self) -> &'static str {
        "context mirror"
    }

    fn run(&self, ctx: &StepContext<'_>) -> Result<StepStatus, UpdateError> {
        let roots = ContextRoots::from_config(ctx.cfg);
        let report = pipeline::run(
            &roots,
            &ctx.cfg.context_name,
            Direction::HostToSandbox,
            ctx.options.dry_run,
        )?;

        let counts = format!(
            "{} synced, {} unchanged, {} deleted, {} skipped",
            report.synced, report.unchanged, report.deleted, report.skipped
        );
        if !report.is_success() {
            let failed: Vec<&str> = report.failures.iter().map(|f| f.hash.as_str()).collect();
            return Ok(StepStatus::failed(
                format!("{} context(s) could not be mirrored ({counts}): {}", report.errors, failed.join(", ")),
                format!("inspect {}/meta/<hash>/meta.json", roots.host.display()),
            ));
        }
        Ok(match (report.changed(), ctx.options.dry_run) {
            (false, _) => StepStatus::UpToDate(counts),
            (true, true) => StepStatus::WouldUpdate(counts),
            (true, false) => StepStatus::Updated(counts),
        })
    }
}
