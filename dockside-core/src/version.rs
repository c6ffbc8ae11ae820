//! Dot-separated numeric version ordering.
//!
//! Versions compare component by component as integers, so `"1.9.0"` sorts
//! before `"1.10.0"`. Missing trailing components count as zero.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A parsed version: one `u64` per dot-separated component.
#[derive(Debug, Clone, Eq)]
pub struct Version(Vec<u64>);

impl Version {
    pub fn components(&self) -> &[u64] {
        &self.0
    }
}

impl FromStr for Version {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('v');
        if trimmed.is_empty() {
            return Err("empty version".to_string());
        }
        trimmed
            .split('.')
            .map(|part| {
                part.parse::<u64>()
                    .map_err(|_| format!("non-numeric component '{part}' in '{s}'"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Version)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        for i in 0..len {
            let a = self.0.get(i).copied().unwrap_or(0);
            let b = other.0.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u64::to_string).collect();
        f.write_str(&parts.join("."))
    }
}

/// `true` when `candidate` is strictly newer than `current`.
///
/// Equal versions, downgrades and malformed input on either side all yield
/// `false`; this never fails.
pub fn version_is_greater(current: &str, candidate: &str) -> bool {
    match (current.parse::<Version>(), candidate.parse::<Version>()) {
        (Ok(current), Ok(candidate)) => candidate > current,
        _ => false,
    }
}
