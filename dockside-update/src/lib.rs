//! # dockside-update
//!
//! The update reconciliation engine behind `dockside update` and the silent
//! pre-command version check.
//!
//! [`Orchestrator`] runs one [`ReconcileStep`] per managed subsystem in a
//! fixed per-platform order. External tools (systemd, the docker CLI,
//! limactl, the download index) are reached only through the traits in
//! [`collaborators`], so the whole engine runs against fakes in tests.
//!
//! ```rust,no_run
//! use dockside_core::Config;
//! use dockside_detect::detect_host;
//! use dockside_update::{Orchestrator, SystemCollaborators, UpdateOptions};
//!
//! fn update(cfg: &Config) -> i32 {
//!     let Ok(host) = detect_host() else { return 1 };
//!     let tools = SystemCollaborators::new(&cfg.index_url);
//!     match Orchestrator::new(cfg, host, UpdateOptions::default(), tools.borrow()).run() {
//!         Ok(report) => report.exit_code(),
//!         Err(_) => 1,
//!     }
//! }
//! ```

pub mod bundle;
pub mod collaborators;
pub mod error;
pub mod oracle;
pub mod orchestrator;
pub mod steps;

#[cfg(test)]
mod testing;

pub use bundle::{BundleInstaller, InstalledBundle, KEEP_VERSIONS, REQUIRED_BINARIES};
pub use collaborators::{
    Collaborators, ContextStore, Prompter, ServiceManager, SocketProbe, SystemCollaborators,
    VersionIndex, VmManager, VmState,
};
pub use error::UpdateError;
pub use oracle::{precheck, Advisory};
pub use orchestrator::{
    Orchestrator, Overall, StepOutcome, UpdateReport, EXIT_CANCELLED, EXIT_ISSUES, EXIT_OK,
};
pub use steps::{ReconcileStep, StepContext, StepStatus, UpdateOptions};
