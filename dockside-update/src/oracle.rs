//! VersionOracle: latest remote bundle version and the check schedule.

use std::path::Path;

use chrono::{DateTime, Utc};
use regex::Regex;

use dockside_core::state::{read_check_state, read_version_marker, write_check_state};
use dockside_core::{version_is_greater, CheckInterval, CheckOutcome, CheckState, Version};
use dockside_detect::Arch;

use crate::collaborators::VersionIndex;
use crate::error::UpdateError;

/// Pre-command notice that a newer bundle exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advisory {
    pub installed: String,
    pub latest: String,
}

impl std::fmt::Display for Advisory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "docker {} is available (installed: {}); run `dockside update`",
            self.latest, self.installed
        )
    }
}

const ARCHIVE_PATTERN: &str = r"docker-(\d+(?:\.\d+)+)\.tgz";

/// Highest `docker-<version>.tgz` named in an index page.
///
/// `docker-rootless-extras-<version>.tgz` never matches because the version
/// must follow `docker-` directly.
pub fn parse_index_listing(body: &str) -> Result<String, UpdateError> {
    let pattern = Regex::new(ARCHIVE_PATTERN).map_err(|e| UpdateError::Parse(e.to_string()))?;
    pattern
        .captures_iter(body)
        .filter_map(|caps| {
            let raw = caps.get(1)?.as_str();
            raw.parse::<Version>().ok().map(|v| (v, raw.to_string()))
        })
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, raw)| raw)
        .ok_or_else(|| UpdateError::Parse("no docker-<version>.tgz entries in index".into()))
}

/// Whether a remote check is due.
pub fn should_check(interval: CheckInterval, last: Option<&CheckState>, now: DateTime<Utc>) -> bool {
    let Some(secs) = interval.as_secs() else {
        return false;
    };
    match last {
        None => true,
        Some(state) => {
            let elapsed = (now - state.checked_at).num_seconds();
            // A timestamp from the future (clock skew, hand-edited file) is due.
            elapsed < 0 || elapsed >= secs as i64
        }
    }
}

pub fn outcome_of<T>(result: &Result<T, UpdateError>) -> CheckOutcome {
    match result {
        Ok(_) => CheckOutcome::Ok,
        Err(UpdateError::Parse(_)) => CheckOutcome::ParseError,
        Err(_) => CheckOutcome::NetworkError,
    }
}

/// Persist the outcome of a check made at `now`.
pub fn record_outcome(
    state_dir: &Path,
    outcome: CheckOutcome,
    now: DateTime<Utc>,
) -> Result<(), UpdateError> {
    write_check_state(
        state_dir,
        &CheckState {
            checked_at: now,
            outcome,
        },
    )?;
    Ok(())
}

/// Ask the index and record the outcome, whatever it is.
pub fn latest_version(
    index: &dyn VersionIndex,
    arch: Arch,
    state_dir: &Path,
    now: DateTime<Utc>,
) -> Result<String, UpdateError> {
    let result = index.latest_version(arch);
    if let Err(err) = record_outcome(state_dir, outcome_of(&result), now) {
        tracing::warn!(error = %err, "could not record version check");
    }
    result
}

/// Silent pre-command check. Never fails: every problem is logged and
/// turned into "no advisory".
pub fn precheck(
    state_dir: &Path,
    interval: CheckInterval,
    arch: Arch,
    index: &dyn VersionIndex,
    now: DateTime<Utc>,
) -> Option<Advisory> {
    let installed = match read_version_marker(state_dir) {
        Ok(Some(v)) => v,
        Ok(None) => return None,
        Err(err) => {
            tracing::debug!(error = %err, "version marker unreadable");
            return None;
        }
    };
    let last = read_check_state(state_dir).ok().flatten();
    if !should_check(interval, last.as_ref(), now) {
        return None;
    }
    match latest_version(index, arch, state_dir, now) {
        Ok(latest) if version_is_greater(&installed, &latest) => Some(Advisory { installed, latest }),
        Ok(_) => None,
        Err(err) => {
            tracing::debug!(error = %err, "version check failed");
            None
        }
    }
}
