//! dockside core library: configuration, persisted engine state, version
//! ordering and atomic file helpers.
//!
//! Public API surface:
//! - [`config`]: immutable [`Config`] built once at startup
//! - [`state`]: check-state, template-hash and version-marker files
//! - [`version`]: numeric dot-component version ordering
//! - [`fsutil`]: write-temp-then-rename helpers
//! - [`error`]: [`CoreError`]

pub mod config;
pub mod error;
pub mod fsutil;
pub mod state;
pub mod version;

pub use config::{CheckInterval, Config, EnvOverrides, Settings, WaitPolicy};
pub use error::CoreError;
pub use state::{CheckOutcome, CheckState};
pub use version::{version_is_greater, Version};
