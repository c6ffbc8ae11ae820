//! Shared mirror entrypoint used by the CLI, the watcher and the update run.

use std::path::PathBuf;

use dockside_core::Config;

use crate::mirror::{ContextMirror, Direction, SyncReport};
use crate::SyncError;

/// The two context stores dockside keeps in step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextRoots {
    /// The user's own docker CLI store, normally `~/.docker/contexts`.
    pub host: PathBuf,
    /// The sandboxed docker CLI store.
    pub sandbox: PathBuf,
}

impl ContextRoots {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            host: cfg.host_contexts.clone(),
            sandbox: cfg.sandbox_contexts.clone(),
        }
    }

    /// `(source, target)` for a direction.
    pub fn ordered(&self, direction: Direction) -> (&PathBuf, &PathBuf) {
        match direction {
            Direction::HostToSandbox => (&self.host, &self.sandbox),
            Direction::SandboxToHost => (&self.sandbox, &self.host),
        }
    }
}

/// Run one mirror pass in `direction`, protecting the context named
/// `reserved`.
///
/// This is the canonical pass for `dockside context sync`, the watcher and
/// the update run's mirror step.
pub fn run(
    roots: &ContextRoots,
    reserved: &str,
    direction: Direction,
    dry_run: bool,
) -> Result<SyncReport, SyncError> {
    let (source, target) = roots.ordered(direction);
    ContextMirror::new(reserved)
        .dry_run(dry_run)
        .sync_once(source, target, direction)
}

/// Bring both stores to the union of their records.
///
/// Each side first receives the records it lacks, with nothing overwritten or
/// deleted. A host-to-sandbox pass then settles records that differ, so the
/// host copy wins a conflict. That final pass only runs for real runs where
/// both merges succeeded: until then the host may still lack sandbox-only
/// records, and a mirror pass would delete them.
pub fn run_both(
    roots: &ContextRoots,
    reserved: &str,
    dry_run: bool,
) -> Result<Vec<SyncReport>, SyncError> {
    let mut reports = Vec::with_capacity(3);
    for direction in [Direction::HostToSandbox, Direction::SandboxToHost] {
        let (source, target) = roots.ordered(direction);
        let report = ContextMirror::new(reserved)
            .dry_run(dry_run)
            .merge(true)
            .sync_once(source, target, direction)?;
        reports.push(report);
    }
    if !dry_run && reports.iter().all(SyncReport::is_success) {
        reports.push(run(roots, reserved, Direction::HostToSandbox, false)?);
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use dockside_core::EnvOverrides;
    use tempfile::TempDir;

    use super::*;
    use crate::meta;

    #[test]
    fn roots_follow_config() {
        let home = TempDir::new().expect("home");
        let cfg = Config::defaults_at(home.path(), None);
        let roots = ContextRoots::from_config(&cfg);
        assert_eq!(roots.host, home.path().join(".docker").join("contexts"));
        let (src, dst) = roots.ordered(Direction::SandboxToHost);
        assert_eq!(src, &roots.sandbox);
        assert_eq!(dst, &roots.host);
    }

    #[test]
    fn run_mirrors_in_requested_direction() {
        let home = TempDir::new().expect("home");
        let cfg = Config::load_at(home.path(), &EnvOverrides::default()).expect("config");
        let roots = ContextRoots::from_config(&cfg);

        let hash = meta::context_hash("staging");
        let dir = meta::meta_dir(&roots.sandbox, &hash);
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(dir.join(meta::META_FILE), r#"{"Name":"staging"}"#).expect("write");

        let report = run(&roots, &cfg.context_name, Direction::SandboxToHost, false).expect("run");
        assert_eq!(report.synced, 1);
        assert!(meta::meta_dir(&roots.host, &hash).join(meta::META_FILE).exists());
    }

    fn write_context(root: &std::path::Path, name: &str, host: &str) -> String {
        let hash = meta::context_hash(name);
        let dir = meta::meta_dir(root, &hash);
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(
            dir.join(meta::META_FILE),
            format!(r#"{{"Name":"{name}","Endpoints":{{"docker":{{"Host":"{host}"}}}}}}"#),
        )
        .expect("write");
        hash
    }

    fn host_of(root: &std::path::Path, hash: &str) -> Option<String> {
        match meta::read_meta(root, hash).expect("meta") {
            meta::MetaState::Present(m) => m.docker_host().map(str::to_string),
            meta::MetaState::Absent => None,
        }
    }

    #[test]
    fn both_keeps_records_created_on_either_side() {
        let home = TempDir::new().expect("home");
        let cfg = Config::defaults_at(home.path(), None);
        let roots = ContextRoots::from_config(&cfg);
        let from_host = write_context(&roots.host, "made-on-host", "tcp://h:2376");
        let from_sandbox = write_context(&roots.sandbox, "made-in-sandbox", "tcp://s:2376");
        let shared = write_context(&roots.host, "shared", "tcp://host-wins:2376");
        write_context(&roots.sandbox, "shared", "tcp://sandbox-loses:2376");

        let reports = run_both(&roots, &cfg.context_name, false).expect("both");
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| r.deleted == 0), "{reports:?}");

        for root in [&roots.host, &roots.sandbox] {
            assert!(host_of(root, &from_host).is_some());
            assert_eq!(host_of(root, &from_sandbox).as_deref(), Some("tcp://s:2376"));
            assert_eq!(host_of(root, &shared).as_deref(), Some("tcp://host-wins:2376"));
        }
    }

    #[test]
    fn both_dry_run_counts_missing_records_and_writes_nothing() {
        let home = TempDir::new().expect("home");
        let cfg = Config::defaults_at(home.path(), None);
        let roots = ContextRoots::from_config(&cfg);
        write_context(&roots.host, "made-on-host", "tcp://h:2376");
        let from_sandbox = write_context(&roots.sandbox, "made-in-sandbox", "tcp://s:2376");

        let reports = run_both(&roots, &cfg.context_name, true).expect("both");
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].synced, 1);
        assert_eq!(reports[1].synced, 1);
        assert!(reports.iter().all(|r| r.merge && r.deleted == 0));
        assert!(!meta::meta_dir(&roots.host, &from_sandbox).exists());
    }
}
