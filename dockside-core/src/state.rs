//! Persisted engine state.
//!
//! # Storage layout
//!
//! ```text
//! <state_dir>/
//!   last-update-check      "<unix-seconds> <ok|network_error|parse_error>"
//!   lima-template.sha256   hex digest of the last applied VM template
//!   docker-version         installed daemon bundle version
//! ```
//!
//! Each file is a single line rewritten through [`atomic_write`]. Readers
//! treat a missing file as "no state yet"; the check-state reader also treats
//! an unparsable file that way, since it only gates a rate limiter.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};

use crate::error::{io_err, CoreError};
use crate::fsutil::atomic_write;

pub const CHECK_STATE_FILE: &str = "last-update-check";
pub const TEMPLATE_HASH_FILE: &str = "lima-template.sha256";
pub const VERSION_MARKER_FILE: &str = "docker-version";

// ---------------------------------------------------------------------------
// Check state
// ---------------------------------------------------------------------------

/// Result tag of the last remote version check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Ok,
    NetworkError,
    ParseError,
}

impl CheckOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckOutcome::Ok => "ok",
            CheckOutcome::NetworkError => "network_error",
            CheckOutcome::ParseError => "parse_error",
        }
    }
}

impl fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(CheckOutcome::Ok),
            "network_error" => Ok(CheckOutcome::NetworkError),
            "parse_error" => Ok(CheckOutcome::ParseError),
            other => Err(format!("unknown check outcome '{other}'")),
        }
    }
}

/// Timestamp and outcome of the last remote version check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckState {
    pub checked_at: DateTime<Utc>,
    pub outcome: CheckOutcome,
}

impl CheckState {
    fn encode(&self) -> String {
        format!("{} {}\n", self.checked_at.timestamp(), self.outcome)
    }

    fn decode(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let secs = parts.next()?.parse::<i64>().ok()?;
        let outcome = parts.next()?.parse::<CheckOutcome>().ok()?;
        let checked_at = Utc.timestamp_opt(secs, 0).single()?;
        Some(CheckState {
            checked_at,
            outcome,
        })
    }
}

pub fn check_state_path(state_dir: &Path) -> PathBuf {
    state_dir.join(CHECK_STATE_FILE)
}

/// Load the check state. Missing or unparsable files yield `None`.
pub fn read_check_state(state_dir: &Path) -> Result<Option<CheckState>, CoreError> {
    Ok(read_line(&check_state_path(state_dir))?.and_then(|line| CheckState::decode(&line)))
}

pub fn write_check_state(state_dir: &Path, state: &CheckState) -> Result<(), CoreError> {
    atomic_write(&check_state_path(state_dir), state.encode().as_bytes())
}

// ---------------------------------------------------------------------------
// Template hash
// ---------------------------------------------------------------------------

pub fn template_hash_path(state_dir: &Path) -> PathBuf {
    state_dir.join(TEMPLATE_HASH_FILE)
}

pub fn read_template_hash(state_dir: &Path) -> Result<Option<String>, CoreError> {
    read_line(&template_hash_path(state_dir))
}

pub fn write_template_hash(state_dir: &Path, hash: &str) -> Result<(), CoreError> {
    atomic_write(&template_hash_path(state_dir), format!("{hash}\n").as_bytes())
}

// ---------------------------------------------------------------------------
// Version marker
// ---------------------------------------------------------------------------

pub fn version_marker_path(state_dir: &Path) -> PathBuf {
    state_dir.join(VERSION_MARKER_FILE)
}

/// Installed bundle version, or `None` when no bundle has been installed.
pub fn read_version_marker(state_dir: &Path) -> Result<Option<String>, CoreError> {
    read_line(&version_marker_path(state_dir))
}

pub fn write_version_marker(state_dir: &Path, version: &str) -> Result<(), CoreError> {
    atomic_write(&version_marker_path(state_dir), format!("{version}\n").as_bytes())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_line(path: &Path) -> Result<Option<String>, CoreError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            let line = contents.trim();
            Ok((!line.is_empty()).then(|| line.to_string()))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(path, e)),
    }
}
