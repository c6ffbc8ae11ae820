use super::{ReconcileStep, StepContext, StepStatus};
use crate::error::UpdateError;

const FALLBACK_CONTEXT: &str = "default";

/// The managed docker CLI context and its endpoint.
#[derive(Debug, Default)]
pub struct ContextStep;

impl ContextStep {
    pub fn expected_endpoint(ctx: &StepContext<'_>) -> String {
        let socket = if ctx.host.platform.is_macos() {
            &ctx.cfg.vm_socket_path
        } else {
            &ctx.cfg.socket_path
        };
        format!("unix://{}", socket.display())
    }
}

impl ReconcileStep for ContextStep {
    fn name(&self) -> &'static str {
        "docker context"
    }

    fn run(&self, ctx: &StepContext<'_>) -> Result<StepStatus, UpdateError> {
        let name = &ctx.cfg.context_name;
        let expected = Self::expected_endpoint(ctx);
        let store = ctx.tools.contexts;

        match store.endpoint(name)? {
            Some(actual) if actual == expected => {
                Ok(StepStatus::UpToDate(format!("{name} -> {expected}")))
            }
            None if ctx.options.dry_run => Ok(StepStatus::WouldUpdate(format!(
                "would create context {name} -> {expected}"
            ))),
            None => {
                store.create(name, &expected)?;
                Ok(StepStatus::Updated(format!("created {name} -> {expected}")))
            }
            Some(actual) if ctx.options.dry_run => Ok(StepStatus::WouldUpdate(format!(
                "would repoint {name}: {actual} -> {expected}"
            ))),
            Some(actual) => {
                // A context in use cannot be removed; step off it and back.
                let was_current = store.current()? == *name;
                if was_current {
                    store.select(FALLBACK_CONTEXT)?;
                }
                store.remove(name)?;
                store.create(name, &expected)?;
                if was_current {
                    store.select(name)?;
                }
                Ok(StepStatus::Updated(format!(
                    "repointed {name}: {actual} -> {expected}"
                )))
            }
        }
    }
}
