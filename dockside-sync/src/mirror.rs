//! One-shot context mirror.
//!
//! ## `sync_once` protocol
//!
//! 1. Validate roots (non-empty, distinct, not nested).
//! 2. Absent source → empty successful report.
//! 3. Ensure `target/meta` and `target/tls` exist.
//! 4. For every source record: skip the reserved context, skip records whose
//!    trees already match byte-for-byte, otherwise stage a copy next to the
//!    target record and rename it into place.
//! 5. For every target record absent from the source: delete it, unless it is
//!    the reserved context.
//!
//! A failing record bumps `errors` and the pass moves on. The algorithm is
//! symmetric: swapping `source` and `target` is the opposite direction.
//!
//! A merge pass ([`ContextMirror::merge`]) only performs the copies of step 4
//! for records the target lacks entirely, and skips step 5.

use std::collections::BTreeMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use filetime::{set_file_mtime, FileTime};

use crate::error::{io_err, SyncError};
use crate::meta::{self, MetaState, META_DIR, TLS_DIR};

const STAGING_SUFFIX: &str = "dockside-sync";
const RETIRED_SUFFIX: &str = "dockside-old";

// ---------------------------------------------------------------------------
// Direction
// ---------------------------------------------------------------------------

/// Which store is the source of a pass. Only used for labelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    HostToSandbox,
    SandboxToHost,
}

impl Direction {
    pub fn reverse(&self) -> Direction {
        match self {
            Direction::HostToSandbox => Direction::SandboxToHost,
            Direction::SandboxToHost => Direction::HostToSandbox,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::HostToSandbox => f.write_str("host-to-sandbox"),
            Direction::SandboxToHost => f.write_str("sandbox-to-host"),
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host-to-sandbox" => Ok(Direction::HostToSandbox),
            "sandbox-to-host" => Ok(Direction::SandboxToHost),
            other => Err(format!(
                "unknown direction '{other}'; expected: host-to-sandbox, sandbox-to-host"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// SyncReport
// ---------------------------------------------------------------------------

/// A record the pass could not process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    pub hash: String,
    pub message: String,
}

/// Counts from one mirror pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub direction: Direction,
    /// Set for merge passes, which never overwrite or delete.
    pub merge: bool,
    /// Records copied (or, in dry-run, that would be copied).
    pub synced: usize,
    /// Records already identical on both sides, or left alone by a merge.
    pub unchanged: usize,
    /// Records removed from the target (or that would be).
    pub deleted: usize,
    /// Reserved-context encounters, never copied or deleted.
    pub skipped: usize,
    pub errors: usize,
    pub failures: Vec<RecordFailure>,
}

impl SyncReport {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            merge: false,
            synced: 0,
            unchanged: 0,
            deleted: 0,
            skipped: 0,
            errors: 0,
            failures: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.errors == 0
    }

    /// `true` when the pass changed (or would change) the target.
    pub fn changed(&self) -> bool {
        self.synced > 0 || self.deleted > 0
    }

    fn fail(&mut self, hash: &str, err: SyncError) {
        tracing::warn!("context {hash}: {err}");
        self.errors += 1;
        self.failures.push(RecordFailure {
            hash: hash.to_string(),
            message: err.to_string(),
        });
    }
}

#[derive(Debug, PartialEq, Eq)]
enum RecordAction {
    Copied,
    Unchanged,
    Deleted,
    Reserved,
}

// ---------------------------------------------------------------------------
// ContextMirror
// ---------------------------------------------------------------------------

/// Mirrors context records between two stores, never touching the context
/// named `reserved_name` on either side.
#[derive(Debug, Clone)]
pub struct ContextMirror {
    reserved_name: String,
    dry_run: bool,
    merge: bool,
}

impl ContextMirror {
    pub fn new(reserved_name: impl Into<String>) -> Self {
        Self {
            reserved_name: reserved_name.into(),
            dry_run: false,
            merge: false,
        }
    }

    /// In dry-run mode the pass decides and counts but writes nothing.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// A merge pass copies only records missing from the target and deletes
    /// nothing.
    pub fn merge(mut self, merge: bool) -> Self {
        self.merge = merge;
        self
    }

    pub fn reserved_name(&self) -> &str {
        &self.reserved_name
    }

    /// Run one pass from `source` to `target`.
    pub fn sync_once(
        &self,
        source: &Path,
        target: &Path,
        direction: Direction,
    ) -> Result<SyncReport, SyncError> {
        validate_roots(source, target)?;
        let mut report = SyncReport::new(direction);
        report.merge = self.merge;

        if !source.exists() {
            tracing::debug!("{direction}: source {} absent, nothing to do", source.display());
            return Ok(report);
        }

        if !self.dry_run {
            for sub in [META_DIR, TLS_DIR] {
                let dir = target.join(sub);
                std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
            }
        }

        let source_records = meta::list_records(source)?;
        for hash in &source_records {
            match self.copy_record(source, target, hash) {
                Ok(RecordAction::Copied) => report.synced += 1,
                Ok(RecordAction::Unchanged) => report.unchanged += 1,
                Ok(RecordAction::Reserved) => report.skipped += 1,
                Ok(RecordAction::Deleted) => {}
                Err(err) => report.fail(hash, err),
            }
        }

        let target_records = if self.merge {
            Default::default()
        } else {
            meta::list_records(target)?
        };
        for hash in target_records.difference(&source_records) {
            match self.delete_record(target, hash) {
                Ok(RecordAction::Deleted) => report.deleted += 1,
                Ok(RecordAction::Reserved) => report.skipped += 1,
                Ok(_) => {}
                Err(err) => report.fail(hash, err),
            }
        }

        tracing::info!(
            "{}{direction}{}: {} synced, {} unchanged, {} deleted, {} skipped, {} errors",
            if self.dry_run { "[dry-run] " } else { "" },
            if self.merge { " (merge)" } else { "" },
            report.synced,
            report.unchanged,
            report.deleted,
            report.skipped,
            report.errors,
        );
        Ok(report)
    }

    fn is_reserved(&self, state: &MetaState) -> bool {
        state.is_named(&self.reserved_name)
    }

    /// Whether the target copy of `hash` is the reserved context.
    ///
    /// Hashes follow names, so a readable, non-reserved source whose name
    /// hashes to `hash` settles the question and an unreadable target copy is
    /// simply overwritten.
    fn target_reserved(
        &self,
        source_meta: &MetaState,
        target: &Path,
        hash: &str,
    ) -> Result<bool, SyncError> {
        match meta::read_meta(target, hash) {
            Ok(state) => Ok(self.is_reserved(&state)),
            Err(err) => match source_meta {
                MetaState::Present(m) if meta::context_hash(&m.name) == hash => {
                    tracing::warn!("context {hash}: replacing unreadable target copy ({err})");
                    Ok(false)
                }
                _ => Err(err),
            },
        }
    }

    fn copy_record(
        &self,
        source: &Path,
        target: &Path,
        hash: &str,
    ) -> Result<RecordAction, SyncError> {
        // Either side holding the reserved context protects the record.
        let source_meta = meta::read_meta(source, hash)?;
        if self.is_reserved(&source_meta) || self.target_reserved(&source_meta, target, hash)? {
            tracing::debug!("context {hash}: reserved, not mirrored");
            return Ok(RecordAction::Reserved);
        }

        if self.merge
            && (meta::meta_dir(target, hash).exists() || meta::tls_dir(target, hash).exists())
        {
            return Ok(RecordAction::Unchanged);
        }

        let pairs = [
            (meta::meta_dir(source, hash), meta::meta_dir(target, hash)),
            (meta::tls_dir(source, hash), meta::tls_dir(target, hash)),
        ];

        let mut identical = true;
        for (src, dst) in &pairs {
            if !trees_equal(src, dst)? {
                identical = false;
                break;
            }
        }
        if identical {
            return Ok(RecordAction::Unchanged);
        }

        if self.dry_run {
            tracing::info!("[dry-run] would copy context {hash}");
            return Ok(RecordAction::Copied);
        }

        for (src, dst) in &pairs {
            if !trees_equal(src, dst)? {
                replace_tree(src, dst)?;
            }
        }
        tracing::debug!("copied context {hash}");
        Ok(RecordAction::Copied)
    }

    fn delete_record(&self, target: &Path, hash: &str) -> Result<RecordAction, SyncError> {
        if self.is_reserved(&meta::read_meta(target, hash)?) {
            return Ok(RecordAction::Reserved);
        }
        if self.dry_run {
            tracing::info!("[dry-run] would delete context {hash}");
            return Ok(RecordAction::Deleted);
        }
        remove_tree(&meta::meta_dir(target, hash))?;
        remove_tree(&meta::tls_dir(target, hash))?;
        tracing::debug!("deleted context {hash}");
        Ok(RecordAction::Deleted)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn validate_roots(source: &Path, target: &Path) -> Result<(), SyncError> {
    if source.as_os_str().is_empty() || target.as_os_str().is_empty() {
        return Err(SyncError::InvalidArgument(
            "source and target must be non-empty paths".to_string(),
        ));
    }
    let source = normalize(source);
    let target = normalize(target);
    if source == target {
        return Err(SyncError::InvalidArgument(format!(
            "source and target are the same directory: {}",
            source.display()
        )));
    }
    if source.starts_with(&target) || target.starts_with(&source) {
        return Err(SyncError::InvalidArgument(format!(
            "source {} and target {} are nested",
            source.display(),
            target.display()
        )));
    }
    Ok(())
}

fn normalize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Regular files under `dir`, keyed by path relative to `dir`.
fn collect_files(dir: &Path) -> Result<BTreeMap<PathBuf, PathBuf>, SyncError> {
    let mut files = BTreeMap::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let entries = std::fs::read_dir(&current).map_err(|e| io_err(&current, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&current, e))?;
            let path = entry.path();
            let ty = entry.file_type().map_err(|e| io_err(&path, e))?;
            if ty.is_dir() {
                stack.push(path);
            } else if ty.is_file() {
                let rel = path.strip_prefix(dir).unwrap_or(&path).to_path_buf();
                files.insert(rel, path);
            }
        }
    }
    Ok(files)
}

fn trees_equal(a: &Path, b: &Path) -> Result<bool, SyncError> {
    match (a.is_dir(), b.is_dir()) {
        (false, false) => return Ok(true),
        (true, true) => {}
        _ => return Ok(false),
    }
    let left = collect_files(a)?;
    let right = collect_files(b)?;
    if left.len() != right.len() || !left.keys().eq(right.keys()) {
        return Ok(false);
    }
    for (rel, left_path) in &left {
        let right_path = &right[rel];
        let lb = std::fs::read(left_path).map_err(|e| io_err(left_path, e))?;
        let rb = std::fs::read(right_path).map_err(|e| io_err(right_path, e))?;
        if lb != rb || !same_mode(left_path, right_path)? {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(unix)]
fn same_mode(a: &Path, b: &Path) -> Result<bool, SyncError> {
    use std::os::unix::fs::PermissionsExt;
    let ma = std::fs::metadata(a).map_err(|e| io_err(a, e))?.permissions().mode();
    let mb = std::fs::metadata(b).map_err(|e| io_err(b, e))?.permissions().mode();
    Ok(ma == mb)
}

#[cfg(not(unix))]
fn same_mode(_a: &Path, _b: &Path) -> Result<bool, SyncError> {
    Ok(true)
}

/// Copy `src` into a staging sibling of `dst`, then swap it in by rename.
/// An absent `src` removes `dst`.
fn replace_tree(src: &Path, dst: &Path) -> Result<(), SyncError> {
    if !src.is_dir() {
        return remove_tree(dst);
    }
    let staging = sibling(dst, STAGING_SUFFIX);
    let retired = sibling(dst, RETIRED_SUFFIX);
    remove_tree(&staging)?;

    if let Err(err) = copy_tree(src, &staging) {
        let _ = std::fs::remove_dir_all(&staging);
        return Err(err);
    }

    if dst.exists() {
        remove_tree(&retired)?;
        std::fs::rename(dst, &retired).map_err(|e| io_err(dst, e))?;
    }
    if let Err(e) = std::fs::rename(&staging, dst) {
        // Put the previous record back so the target never loses it.
        let _ = std::fs::rename(&retired, dst);
        let _ = std::fs::remove_dir_all(&staging);
        return Err(io_err(dst, e));
    }
    remove_tree(&retired)
}

fn copy_tree(src: &Path, dst: &Path) -> Result<(), SyncError> {
    std::fs::create_dir_all(dst).map_err(|e| io_err(dst, e))?;
    let perms = std::fs::metadata(src).map_err(|e| io_err(src, e))?.permissions();
    std::fs::set_permissions(dst, perms).map_err(|e| io_err(dst, e))?;

    for (rel, from) in collect_files(src)? {
        let to = dst.join(&rel);
        if let Some(parent) = to.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        // fs::copy carries permission bits; mtime is restored explicitly.
        std::fs::copy(&from, &to).map_err(|e| io_err(&from, e))?;
        let meta = std::fs::metadata(&from).map_err(|e| io_err(&from, e))?;
        set_file_mtime(&to, FileTime::from_last_modification_time(&meta))
            .map_err(|e| io_err(&to, e))?;
    }
    Ok(())
}

fn remove_tree(path: &Path) -> Result<(), SyncError> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err(path, e)),
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{suffix}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_context(root: &Path, name: &str, host: &str) -> String {
        let hash = meta::context_hash(name);
        let dir = meta::meta_dir(root, &hash);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(meta::META_FILE),
            format!(
                r#"{{"Name":"{name}","Metadata":{{}},"Endpoints":{{"docker":{{"Host":"{host}","SkipTLSVerify":false}}}}}}"#
            ),
        )
        .unwrap();
        hash
    }

    #[test]
    fn direction_round_trips_through_display() {
        for d in [Direction::HostToSandbox, Direction::SandboxToHost] {
            assert_eq!(d.to_string().parse::<Direction>().unwrap(), d);
            assert_eq!(d.reverse().reverse(), d);
        }
    }

    #[test]
    fn nested_or_identical_roots_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let mirror = ContextMirror::new("dockside");
        let root = tmp.path().join("contexts");
        for (src, dst) in [
            (root.clone(), root.clone()),
            (root.clone(), root.join("inner")),
            (root.join("inner"), root.clone()),
            (PathBuf::new(), root.clone()),
        ] {
            assert!(matches!(
                mirror.sync_once(&src, &dst, Direction::HostToSandbox),
                Err(SyncError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn absent_source_is_a_successful_no_op() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("target");
        let report = ContextMirror::new("dockside")
            .sync_once(&tmp.path().join("missing"), &target, Direction::HostToSandbox)
            .unwrap();
        assert!(report.is_success());
        assert!(!report.changed());
        assert!(!target.exists(), "absent source must not create the target");
    }

    #[test]
    fn copies_credentials_and_preserves_mtime() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("host");
        let target = tmp.path().join("sandbox");
        let hash = write_context(&source, "remote", "tcp://build:2376");
        let tls = meta::tls_dir(&source, &hash).join("docker");
        fs::create_dir_all(&tls).unwrap();
        fs::write(tls.join("ca.pem"), "CA").unwrap();
        let old = FileTime::from_unix_time(1_600_000_000, 0);
        set_file_mtime(tls.join("ca.pem"), old).unwrap();

        let report = ContextMirror::new("dockside")
            .sync_once(&source, &target, Direction::HostToSandbox)
            .unwrap();
        assert_eq!(report.synced, 1);

        let copied = meta::tls_dir(&target, &hash).join("docker").join("ca.pem");
        assert_eq!(fs::read_to_string(&copied).unwrap(), "CA");
        let mtime = FileTime::from_last_modification_time(&fs::metadata(&copied).unwrap());
        assert_eq!(mtime, old);
    }

    #[test]
    fn dropped_tls_is_removed_from_target() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("host");
        let target = tmp.path().join("sandbox");
        let hash = write_context(&source, "remote", "tcp://build:2376");
        fs::create_dir_all(meta::tls_dir(&source, &hash)).unwrap();
        fs::write(meta::tls_dir(&source, &hash).join("key.pem"), "K").unwrap();

        let mirror = ContextMirror::new("dockside");
        mirror.sync_once(&source, &target, Direction::HostToSandbox).unwrap();
        assert!(meta::tls_dir(&target, &hash).exists());

        fs::remove_dir_all(meta::tls_dir(&source, &hash)).unwrap();
        let report = mirror.sync_once(&source, &target, Direction::HostToSandbox).unwrap();
        assert_eq!(report.synced, 1);
        assert!(!meta::tls_dir(&target, &hash).exists());
    }

    #[test]
    fn staging_directories_do_not_linger() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("host");
        let target = tmp.path().join("sandbox");
        let hash = write_context(&source, "remote", "tcp://a:2376");
        let mirror = ContextMirror::new("dockside");
        mirror.sync_once(&source, &target, Direction::HostToSandbox).unwrap();
        write_context(&source, "remote", "tcp://b:2376");
        mirror.sync_once(&source, &target, Direction::HostToSandbox).unwrap();

        let leftovers: Vec<_> = fs::read_dir(target.join(META_DIR))
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with('.'))
            .collect();
        assert!(leftovers.is_empty(), "leftover staging dirs: {leftovers:?}");
        let meta = meta::read_meta(&target, &hash).unwrap();
        match meta {
            MetaState::Present(m) => assert_eq!(m.docker_host(), Some("tcp://b:2376")),
            MetaState::Absent => panic!("record missing"),
        }
    }

    #[test]
    fn malformed_meta_blocks_that_record_only() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("host");
        let target = tmp.path().join("sandbox");
        write_context(&source, "good", "tcp://good:2376");
        let bad = meta::meta_dir(&source, "badbadbad");
        fs::create_dir_all(&bad).unwrap();
        fs::write(bad.join(meta::META_FILE), "{").unwrap();

        let report = ContextMirror::new("dockside")
            .sync_once(&source, &target, Direction::HostToSandbox)
            .unwrap();
        assert_eq!(report.synced, 1);
        assert_eq!(report.errors, 1);
        assert!(!report.is_success());
        assert_eq!(report.failures[0].hash, "badbadbad");
        assert!(!meta::meta_dir(&target, "badbadbad").exists());
    }

    #[test]
    fn corrupted_target_copy_is_repaired_from_valid_source() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("host");
        let target = tmp.path().join("sandbox");
        let hash = write_context(&source, "remote", "tcp://build:2376");
        let mirror = ContextMirror::new("dockside");
        mirror.sync_once(&source, &target, Direction::HostToSandbox).unwrap();

        let copy = meta::meta_dir(&target, &hash).join(meta::META_FILE);
        fs::write(&copy, "{trunc").unwrap();

        let report = mirror.sync_once(&source, &target, Direction::HostToSandbox).unwrap();
        assert!(report.is_success(), "{report:?}");
        assert_eq!(report.synced, 1);
        match meta::read_meta(&target, &hash).unwrap() {
            MetaState::Present(m) => assert_eq!(m.docker_host(), Some("tcp://build:2376")),
            MetaState::Absent => panic!("record missing"),
        }

        let again = mirror.sync_once(&source, &target, Direction::HostToSandbox).unwrap();
        assert_eq!((again.synced, again.unchanged, again.errors), (0, 1, 0));
    }

    #[test]
    fn corrupted_target_under_mismatched_source_hash_stays_blocked() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("host");
        let target = tmp.path().join("sandbox");
        // Source meta sits under a hash its name does not produce.
        let dir = meta::meta_dir(&source, "cafecafe");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(meta::META_FILE), r#"{"Name":"remote"}"#).unwrap();
        let copy = meta::meta_dir(&target, "cafecafe");
        fs::create_dir_all(&copy).unwrap();
        fs::write(copy.join(meta::META_FILE), "{").unwrap();

        let report = ContextMirror::new("dockside")
            .sync_once(&source, &target, Direction::HostToSandbox)
            .unwrap();
        assert_eq!(report.errors, 1);
        assert_eq!(fs::read_to_string(copy.join(meta::META_FILE)).unwrap(), "{");
    }
}
