//! Runs the reconciliation steps for one platform and folds their statuses
//! into a single outcome.

use std::fmt;

use dockside_core::state::read_version_marker;
use dockside_core::Config;
use dockside_detect::{Host, Platform};
use dockside_render::Renderer;

use crate::bundle::BundleInstaller;
use crate::collaborators::Collaborators;
use crate::error::UpdateError;
use crate::steps::{
    BundleStep, ContextStep, LegacyCleanupStep, MirrorStep, ReconcileStep, StepContext,
    StepStatus, UnitStep, UpdateOptions, VerifyStep, VmStep,
};

pub const EXIT_OK: i32 = 0;
pub const EXIT_ISSUES: i32 = 1;
pub const EXIT_CANCELLED: i32 = 130;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub name: &'static str,
    pub status: StepStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overall {
    AllGood,
    Cancelled,
    CompletedWithIssues,
}

impl fmt::Display for Overall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Overall::AllGood => "all good",
            Overall::Cancelled => "cancelled",
            Overall::CompletedWithIssues => "completed with issues",
        })
    }
}

#[derive(Debug, Clone)]
pub struct UpdateReport {
    pub platform: Platform,
    pub dry_run: bool,
    pub steps: Vec<StepOutcome>,
    pub overall: Overall,
}

impl UpdateReport {
    pub fn exit_code(&self) -> i32 {
        match self.overall {
            Overall::AllGood => EXIT_OK,
            Overall::Cancelled => EXIT_CANCELLED,
            Overall::CompletedWithIssues => EXIT_ISSUES,
        }
    }

    pub fn status_of(&self, name: &str) -> Option<&StepStatus> {
        self.steps.iter().find(|s| s.name == name).map(|s| &s.status)
    }
}

/// Sequences the steps for the detected platform.
pub struct Orchestrator<'a> {
    cfg: &'a Config,
    host: Host,
    options: UpdateOptions,
    tools: Collaborators<'a>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(cfg: &'a Config, host: Host, options: UpdateOptions, tools: Collaborators<'a>) -> Self {
        Self {
            cfg,
            host,
            options,
            tools,
        }
    }

    /// Abort-worthy checks. Anything failing here means the steps cannot
    /// say anything useful.
    pub fn preconditions(&self) -> Result<(), UpdateError> {
        if self.host.platform.is_macos() {
            if !self.tools.vms.is_available() {
                return Err(UpdateError::Precondition {
                    message: "limactl not found on PATH".into(),
                    remediation: "brew install lima".into(),
                });
            }
            return Ok(());
        }

        if !self.tools.services.is_available() {
            return Err(UpdateError::Precondition {
                message: "systemd user session is not available".into(),
                remediation: "enable lingering with `loginctl enable-linger $USER`".into(),
            });
        }
        if read_version_marker(&self.cfg.state_dir)?.is_some() {
            let dockerd = BundleInstaller::from_config(self.cfg)
                .current_link()
                .join("dockerd");
            if !dockerd.exists() {
                return Err(UpdateError::Precondition {
                    message: format!("{} is missing", dockerd.display()),
                    remediation: "re-run `dockside setup` to reinstall the bundle".into(),
                });
            }
        }
        Ok(())
    }

    fn steps(&self) -> Vec<Box<dyn ReconcileStep>> {
        if self.host.platform.is_macos() {
            vec![
                Box::new(VmStep),
                Box::new(ContextStep),
                Box::new(MirrorStep),
                Box::new(VerifyStep),
                Box::new(LegacyCleanupStep),
            ]
        } else {
            vec![
                Box::new(UnitStep),
                Box::new(ContextStep),
                Box::new(MirrorStep),
                Box::new(BundleStep),
                Box::new(VerifyStep),
                Box::new(LegacyCleanupStep),
            ]
        }
    }

    /// Check preconditions, then run every step in order. A step's error is
    /// recorded as its status and the run moves on; a cancellation ends it.
    pub fn run(&self) -> Result<UpdateReport, UpdateError> {
        self.preconditions()?;
        let renderer = Renderer::new()?;
        let ctx = StepContext {
            cfg: self.cfg,
            host: self.host,
            options: self.options,
            tools: self.tools,
            renderer: &renderer,
        };

        let mut outcomes: Vec<StepOutcome> = Vec::new();
        let mut verified = false;
        for step in self.steps() {
            let name = step.name();
            let is_cleanup = name == LegacyCleanupStep.name();
            let status = if is_cleanup && !verified {
                StepStatus::Skipped("verification did not pass; keeping fallbacks".into())
            } else {
                step.run(&ctx).unwrap_or_else(|err| StepStatus::from_error(&err))
            };
            if name == VerifyStep.name() {
                verified = status.is_success();
            }
            log_outcome(name, &status);

            let cancelled = matches!(status, StepStatus::Cancelled(_));
            outcomes.push(StepOutcome { name, status });
            if cancelled {
                break;
            }
        }

        let overall = overall_of(&outcomes);
        tracing::info!(%overall, steps = outcomes.len(), "update finished");
        Ok(UpdateReport {
            platform: self.host.platform,
            dry_run: self.options.dry_run,
            steps: outcomes,
            overall,
        })
    }
}

fn log_outcome(name: &str, status: &StepStatus) {
    match status {
        StepStatus::Failed { .. } => tracing::warn!(step = name, "{status}"),
        StepStatus::Cancelled(_) | StepStatus::Skipped(_) => tracing::info!(step = name, "{status}"),
        _ => tracing::debug!(step = name, "{status}"),
    }
}

fn overall_of(outcomes: &[StepOutcome]) -> Overall {
    if outcomes
        .iter()
        .any(|o| matches!(o.status, StepStatus::Cancelled(_)))
    {
        Overall::Cancelled
    } else if outcomes.iter().any(|o| o.status.is_failure()) {
        Overall::CompletedWithIssues
    } else {
        Overall::AllGood
    }
}
