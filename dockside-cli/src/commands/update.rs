//! `dockside update`: run the reconciliation steps and print a summary.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use dockside_core::Config;
use dockside_detect::detect_host;
use dockside_update::{
    Orchestrator, Overall, StepStatus, SystemCollaborators, UpdateError, UpdateOptions,
    UpdateReport,
};

/// Arguments for `dockside update`.
#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Report what would change without changing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Skip confirmation prompts for destructive steps.
    #[arg(long)]
    pub force: bool,

    /// Rebuild the Lima VM even if its template is unchanged (macOS).
    #[arg(long)]
    pub lima_recreate: bool,
}

#[derive(Tabled)]
struct StepRow {
    #[tabled(rename = "step")]
    step: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "detail")]
    detail: String,
}

impl UpdateArgs {
    pub fn run(self) -> Result<u8> {
        let cfg = Config::load().context("failed to load dockside configuration")?;
        let host = detect_host().context("failed to detect host platform")?;
        let options = UpdateOptions {
            dry_run: self.dry_run,
            force: self.force,
            lima_recreate: self.lima_recreate,
        };
        let tools = SystemCollaborators::new(&cfg.index_url);

        let report = match Orchestrator::new(&cfg, host, options, tools.borrow()).run() {
            Ok(report) => report,
            Err(err @ UpdateError::Precondition { .. }) => {
                eprintln!("{} {err}", "✗".red().bold());
                if let Some(hint) = err.remediation() {
                    eprintln!("  try: {hint}");
                }
                return Ok(1);
            }
            Err(err) => return Err(err).context("update aborted"),
        };

        print_report(&report);
        Ok(report.exit_code() as u8)
    }
}

fn print_report(report: &UpdateReport) {
    let prefix = if report.dry_run { "[dry-run] " } else { "" };
    println!("{prefix}dockside update ({})", report.platform);

    let rows: Vec<StepRow> = report
        .steps
        .iter()
        .map(|outcome| StepRow {
            step: outcome.name.to_string(),
            status: colored_label(&outcome.status),
            detail: first_line(outcome.status.detail()).to_string(),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    // Multi-line details (unit diffs) and remediation hints go below the table.
    for outcome in &report.steps {
        let detail = outcome.status.detail();
        if detail.lines().count() > 1 {
            println!("{}:", outcome.name.bold());
            for line in detail.lines().skip(1) {
                println!("  {line}");
            }
        }
        if let StepStatus::Failed {
            remediation: Some(hint),
            ..
        } = &outcome.status
        {
            println!("{} {}: try `{hint}`", "→".yellow(), outcome.name);
        }
    }

    let summary = match report.overall {
        Overall::AllGood => report.overall.to_string().green().bold(),
        Overall::Cancelled => report.overall.to_string().yellow().bold(),
        Overall::CompletedWithIssues => report.overall.to_string().red().bold(),
    };
    println!("{prefix}{summary}");
}

fn colored_label(status: &StepStatus) -> String {
    let label = status.label();
    match status {
        StepStatus::UpToDate(_) => label.green().to_string(),
        StepStatus::Updated(_) => label.cyan().bold().to_string(),
        StepStatus::WouldUpdate(_) => label.cyan().to_string(),
        StepStatus::Skipped(_) => label.bright_black().to_string(),
        StepStatus::Failed { .. } => label.red().bold().to_string(),
        StepStatus::Cancelled(_) => label.yellow().bold().to_string(),
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}
