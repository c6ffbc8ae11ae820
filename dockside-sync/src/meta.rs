//! Docker context store layout.
//!
//! ```text
//! <root>/
//!   meta/<hash>/meta.json   {"Name": "...", "Endpoints": {...}, ...}
//!   tls/<hash>/...          optional credential material
//! ```
//!
//! `<hash>` is the hex SHA-256 of the context name. Entries whose names start
//! with `.` are mirror staging directories and are never treated as records.

use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::error::{io_err, SyncError};

pub const META_DIR: &str = "meta";
pub const TLS_DIR: &str = "tls";
pub const META_FILE: &str = "meta.json";

/// The subset of `meta.json` the mirror cares about.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ContextMeta {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Endpoints", default)]
    pub endpoints: BTreeMap<String, serde_json::Value>,
}

impl ContextMeta {
    /// `Endpoints.docker.Host`, when present.
    pub fn docker_host(&self) -> Option<&str> {
        self.endpoints
            .get("docker")
            .and_then(|e| e.get("Host"))
            .and_then(|h| h.as_str())
    }
}

/// What reading `meta/<hash>/meta.json` produced.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaState {
    /// No metadata document.
    Absent,
    Present(ContextMeta),
}

impl MetaState {
    pub fn is_named(&self, name: &str) -> bool {
        matches!(self, MetaState::Present(meta) if meta.name == name)
    }
}

/// Directory name docker uses for a context called `name`.
pub fn context_hash(name: &str) -> String {
    let mut h = Sha256::new();
    h.update(name.as_bytes());
    hex::encode(h.finalize())
}

pub fn meta_dir(root: &Path, hash: &str) -> PathBuf {
    root.join(META_DIR).join(hash)
}

pub fn tls_dir(root: &Path, hash: &str) -> PathBuf {
    root.join(TLS_DIR).join(hash)
}

/// Read a record's metadata document.
///
/// Returns [`SyncError::MalformedMeta`] when the document exists but does not
/// parse or lacks `Name`.
pub fn read_meta(root: &Path, hash: &str) -> Result<MetaState, SyncError> {
    let path = meta_dir(root, hash).join(META_FILE);
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(MetaState::Absent),
        Err(e) => return Err(io_err(&path, e)),
    };
    serde_json::from_str::<ContextMeta>(&raw)
        .map(MetaState::Present)
        .map_err(|e| SyncError::MalformedMeta {
            path,
            message: e.to_string(),
        })
}

/// Every record hash under `root`: the union of `meta/` and `tls/` entries.
pub fn list_records(root: &Path) -> Result<BTreeSet<String>, SyncError> {
    let mut records = BTreeSet::new();
    for sub in [META_DIR, TLS_DIR] {
        let dir = root.join(sub);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(io_err(&dir, e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&dir, e))?;
            let ty = entry.file_type().map_err(|e| io_err(entry.path(), e))?;
            if !ty.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            records.insert(name);
        }
    }
    Ok(records)
}
