use super::{ReconcileStep, StepContext, StepStatus};
use crate::error::UpdateError;

/// End-to-end check: the managed context answers `docker info`.
#[derive(Debug, Default)]
pub struct VerifyStep;

impl ReconcileStep for VerifyStep {
    fn name(&self) -> &'static str {
        "verify"
    }

    fn run(&self, ctx: &StepContext<'_>) -> Result<StepStatus, UpdateError> {
        let name = &ctx.cfg.context_name;
        match ctx.tools.contexts.ping(name) {
            Ok(()) => Ok(StepStatus::UpToDate(format!("context {name} reachable"))),
            // Earlier steps only described their changes, so an unreachable
            // daemon here is expected rather than a failure.
            Err(err) if ctx.options.dry_run => Ok(StepStatus::WouldUpdate(format!(
                "context {name} currently unreachable ({err})"
            ))),
            Err(err) => Ok(StepStatus::failed(
                format!("context {name} unreachable: {err}"),
                format!("docker --context {name} info"),
            )),
        }
    }
}
