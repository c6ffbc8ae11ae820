//! Reconciliation steps.
//!
//! Each step compares one piece of declared state with what is on the host
//! and converges only when they differ, so running a step twice with no
//! external change does nothing the second time. In dry-run every step runs
//! its full decision logic and reports [`StepStatus::WouldUpdate`] instead of
//! mutating.

use std::fmt;

use dockside_core::Config;
use dockside_detect::Host;
use dockside_render::Renderer;

use crate::collaborators::Collaborators;
use crate::error::UpdateError;

mod bundle;
mod cleanup;
mod context;
mod mirror;
mod unit;
mod verify;
mod vm;

pub use bundle::BundleStep;
pub use cleanup::LegacyCleanupStep;
pub use context::ContextStep;
pub use mirror::MirrorStep;
pub use unit::{classify_unit, UnitState, UnitStep};
pub use verify::VerifyStep;
pub use vm::VmStep;

/// Flags from `dockside update`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    pub dry_run: bool,
    /// Skip confirmation prompts.
    pub force: bool,
    /// Rebuild the Lima VM even when its template is unchanged.
    pub lima_recreate: bool,
}

/// Everything a step may look at or act through.
pub struct StepContext<'a> {
    pub cfg: &'a Config,
    pub host: Host,
    pub options: UpdateOptions,
    pub tools: Collaborators<'a>,
    pub renderer: &'a Renderer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    UpToDate(String),
    Updated(String),
    WouldUpdate(String),
    Skipped(String),
    Failed {
        message: String,
        remediation: Option<String>,
    },
    Cancelled(String),
}

impl StepStatus {
    pub fn failed(message: impl Into<String>, remediation: impl Into<String>) -> Self {
        StepStatus::Failed {
            message: message.into(),
            remediation: Some(remediation.into()),
        }
    }

    pub fn from_error(err: &UpdateError) -> Self {
        match err {
            UpdateError::UserCancelled => StepStatus::Cancelled("declined at prompt".into()),
            other => StepStatus::Failed {
                message: other.to_string(),
                remediation: other.remediation(),
            },
        }
    }

    /// Short label for tables and logs.
    pub fn label(&self) -> &'static str {
        match self {
            StepStatus::UpToDate(_) => "up to date",
            StepStatus::Updated(_) => "updated",
            StepStatus::WouldUpdate(_) => "would update",
            StepStatus::Skipped(_) => "skipped",
            StepStatus::Failed { .. } => "failed",
            StepStatus::Cancelled(_) => "cancelled",
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            StepStatus::UpToDate(d)
            | StepStatus::Updated(d)
            | StepStatus::WouldUpdate(d)
            | StepStatus::Skipped(d)
            | StepStatus::Cancelled(d) => d,
            StepStatus::Failed { message, .. } => message,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, StepStatus::Failed { .. })
    }

    /// Converged, converging, or (in dry-run) would converge.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            StepStatus::UpToDate(_) | StepStatus::Updated(_) | StepStatus::WouldUpdate(_)
        )
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label(), self.detail())?;
        if let StepStatus::Failed {
            remediation: Some(hint),
            ..
        } = self
        {
            write!(f, " (try: {hint})")?;
        }
        Ok(())
    }
}

/// One reconciliation target.
pub trait ReconcileStep {
    fn name(&self) -> &'static str;
    fn run(&self, ctx: &StepContext<'_>) -> Result<StepStatus, UpdateError>;
}

/// Ask before a destructive action unless `--force` was given. `Ok(false)`
/// means the operator declined.
pub(crate) fn confirm(ctx: &StepContext<'_>, question: &str) -> Result<bool, UpdateError> {
    if ctx.options.force {
        return Ok(true);
    }
    ctx.tools.prompter.confirm(question)
}
