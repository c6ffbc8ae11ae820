//! Static Docker bundle installation.
//!
//! ```text
//! <install_root>/
//!   versions/<ver>/{dockerd, docker, ...}   mode 0755
//!   current -> versions/<ver>
//! <bin_dir>/<binary> -> <install_root>/current/<binary>
//! <state_dir>/docker-version                the version marker
//! ```
//!
//! The archives are downloaded and unpacked in a scratch directory and
//! checked for [`REQUIRED_BINARIES`] before anything under `current` moves.
//! A failed verification leaves the previous version active.

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;

use dockside_core::fsutil::{atomic_symlink, set_mode};
use dockside_core::state::write_version_marker;
use dockside_core::{Config, Version};
use dockside_detect::Arch;

use crate::collaborators::BundleSource;
use crate::error::{io_err, UpdateError};

/// Binaries a rootless daemon cannot run without.
pub const REQUIRED_BINARIES: &[&str] = &[
    "docker",
    "dockerd",
    "containerd",
    "runc",
    "rootlesskit",
    "dockerd-rootless.sh",
];

/// Version directories kept after an install, newest first.
pub const KEEP_VERSIONS: usize = 2;

const SCRATCH_PREFIX: &str = ".download-";

/// Result of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledBundle {
    pub version: String,
    pub dir: PathBuf,
    pub binaries: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BundleInstaller {
    install_root: PathBuf,
    bin_dir: PathBuf,
    state_dir: PathBuf,
}

impl BundleInstaller {
    pub fn new(install_root: PathBuf, bin_dir: PathBuf, state_dir: PathBuf) -> Self {
        Self {
            install_root,
            bin_dir,
            state_dir,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            cfg.install_root.clone(),
            cfg.bin_dir.clone(),
            cfg.state_dir.clone(),
        )
    }

    pub fn versions_dir(&self) -> PathBuf {
        self.install_root.join("versions")
    }

    pub fn current_link(&self) -> PathBuf {
        self.install_root.join("current")
    }

    /// Download, verify and activate `version`.
    pub fn install(
        &self,
        source: &dyn BundleSource,
        version: &str,
        arch: Arch,
    ) -> Result<InstalledBundle, UpdateError> {
        if version.parse::<Version>().is_err() {
            return Err(UpdateError::InvalidArgument(format!(
                "'{version}' is not a bundle version"
            )));
        }
        let scratch = self.install_root.join(format!("{SCRATCH_PREFIX}{version}"));
        remove_path(&scratch)?;
        fs::create_dir_all(&scratch).map_err(|e| io_err(&scratch, e))?;

        let result = self.install_from_scratch(source, version, arch, &scratch);
        if let Err(err) = remove_path(&scratch) {
            tracing::warn!(error = %err, "could not remove download scratch directory");
        }
        result
    }

    fn install_from_scratch(
        &self,
        source: &dyn BundleSource,
        version: &str,
        arch: Arch,
        scratch: &Path,
    ) -> Result<InstalledBundle, UpdateError> {
        let archives = source.download(version, arch, &scratch.join("archives"))?;
        let unpacked = scratch.join("unpacked");
        for archive in &archives {
            extract_archive(archive, &unpacked)?;
        }

        let binaries = collect_binaries(&unpacked)?;
        verify_binaries(&binaries)?;

        let dir = self.versions_dir().join(version);
        let staging = self.versions_dir().join(format!(".{version}.staging"));
        remove_path(&staging)?;
        fs::create_dir_all(&staging).map_err(|e| io_err(&staging, e))?;
        for (name, path) in &binaries {
            let dest = staging.join(name);
            fs::copy(path, &dest).map_err(|e| io_err(path, e))?;
            set_mode(&dest, 0o755)?;
        }
        remove_path(&dir)?;
        fs::rename(&staging, &dir).map_err(|e| io_err(&dir, e))?;

        self.activate(&dir, binaries.iter().map(|(name, _)| name.as_str()))?;
        write_version_marker(&self.state_dir, version)?;
        tracing::info!(version, "docker bundle installed");

        Ok(InstalledBundle {
            version: version.to_string(),
            dir,
            binaries: binaries.into_iter().map(|(name, _)| name).collect(),
        })
    }

    fn activate<'a>(
        &self,
        dir: &Path,
        binaries: impl Iterator<Item = &'a str>,
    ) -> Result<(), UpdateError> {
        let current = self.current_link();
        atomic_symlink(dir, &current)?;
        fs::create_dir_all(&self.bin_dir).map_err(|e| io_err(&self.bin_dir, e))?;
        for name in binaries {
            atomic_symlink(&current.join(name), &self.bin_dir.join(name))?;
        }
        Ok(())
    }

    /// Remove every version directory except the `keep` newest and the one
    /// `current` points at. Returns the removed versions.
    pub fn prune(&self, keep: usize) -> Result<Vec<String>, UpdateError> {
        let versions_dir = self.versions_dir();
        let entries = match fs::read_dir(&versions_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&versions_dir, e)),
        };

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&versions_dir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Ok(parsed) = name.parse::<Version>() {
                versions.push((parsed, name));
            }
        }
        versions.sort_by(|a, b| b.0.cmp(&a.0));

        let active = fs::read_link(self.current_link())
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()));

        let mut removed = Vec::new();
        for (_, name) in versions.into_iter().skip(keep) {
            if active.as_deref() == Some(name.as_str()) {
                continue;
            }
            remove_path(&versions_dir.join(&name))?;
            tracing::debug!(version = %name, "pruned old bundle");
            removed.push(name);
        }
        Ok(removed)
    }
}

/// Unpack a gzip tarball under `dest`.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<(), UpdateError> {
    fs::create_dir_all(dest).map_err(|e| io_err(dest, e))?;
    let file = fs::File::open(archive).map_err(|e| io_err(archive, e))?;
    let mut tarball = Archive::new(GzDecoder::new(file));
    tarball.set_preserve_ownerships(false);
    tarball
        .unpack(dest)
        .map_err(|e| UpdateError::Verification(format!("cannot unpack {}: {e}", archive.display())))
}

/// Regular files one level below each top-level directory of `unpacked`
/// (`docker/dockerd`, `docker-rootless-extras/rootlesskit`, ...), by name.
fn collect_binaries(unpacked: &Path) -> Result<Vec<(String, PathBuf)>, UpdateError> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    let tops = fs::read_dir(unpacked).map_err(|e| io_err(unpacked, e))?;
    let mut dirs: Vec<PathBuf> = tops
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    for dir in dirs {
        let entries = fs::read_dir(&dir).map_err(|e| io_err(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| io_err(&dir, e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if seen.insert(name.clone()) {
                out.push((name, path));
            }
        }
    }
    out.sort();
    Ok(out)
}

fn verify_binaries(binaries: &[(String, PathBuf)]) -> Result<(), UpdateError> {
    let missing: Vec<&str> = REQUIRED_BINARIES
        .iter()
        .copied()
        .filter(|req| !binaries.iter().any(|(name, _)| name == req))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(UpdateError::Verification(format!(
            "bundle is missing required binaries: {}",
            missing.join(", ")
        )))
    }
}

fn remove_path(path: &Path) -> Result<(), UpdateError> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(io_err(path, e)),
    };
    let result = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|e| io_err(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{write_bundle_archive, FakeBundleSource};
    use dockside_core::state::read_version_marker;
    use tempfile::TempDir;

    fn installer(tmp: &TempDir) -> BundleInstaller {
        BundleInstaller::new(
            tmp.path().join("install"),
            tmp.path().join("bin"),
            tmp.path().join("state"),
        )
    }

    #[test]
    fn install_activates_version_and_links_binaries() {
        let tmp = TempDir::new().unwrap();
        let inst = installer(&tmp);
        let source = FakeBundleSource::complete();

        let installed = inst.install(&source, "27.3.1", Arch::X86_64).unwrap();
        assert_eq!(installed.version, "27.3.1");
        assert_eq!(
            fs::read_link(inst.current_link()).unwrap(),
            inst.versions_dir().join("27.3.1")
        );
        let dockerd = tmp.path().join("bin").join("dockerd");
        assert_eq!(
            fs::read_link(&dockerd).unwrap(),
            inst.current_link().join("dockerd")
        );
        assert!(fs::read_to_string(&dockerd).unwrap().contains("27.3.1"));
        assert_eq!(
            read_version_marker(&tmp.path().join("state")).unwrap().as_deref(),
            Some("27.3.1")
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(inst.versions_dir().join("27.3.1").join("runc"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o755);
        }
        let leftovers: Vec<_> = fs::read_dir(tmp.path().join("install"))
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with('.'))
            .collect();
        assert!(leftovers.is_empty(), "scratch left behind: {leftovers:?}");
    }

    #[test]
    fn verification_failure_keeps_previous_version_active() {
        let tmp = TempDir::new().unwrap();
        let inst = installer(&tmp);
        inst.install(&FakeBundleSource::complete(), "27.3.1", Arch::X86_64)
            .unwrap();

        let broken = FakeBundleSource::missing("rootlesskit");
        let err = inst.install(&broken, "27.4.0", Arch::X86_64).unwrap_err();
        assert!(matches!(err, UpdateError::Verification(ref m) if m.contains("rootlesskit")));
        assert_eq!(
            fs::read_link(inst.current_link()).unwrap(),
            inst.versions_dir().join("27.3.1")
        );
        assert!(!inst.versions_dir().join("27.4.0").exists());
        assert_eq!(
            read_version_marker(&tmp.path().join("state")).unwrap().as_deref(),
            Some("27.3.1")
        );
    }

    #[test]
    fn prune_keeps_two_newest_and_active() {
        let tmp = TempDir::new().unwrap();
        let inst = installer(&tmp);
        let source = FakeBundleSource::complete();
        for v in ["9.0.0", "10.0.0", "27.3.1", "27.4.0"] {
            inst.install(&source, v, Arch::X86_64).unwrap();
        }
        let mut removed = inst.prune(KEEP_VERSIONS).unwrap();
        removed.sort();
        assert_eq!(removed, vec!["10.0.0".to_string(), "9.0.0".to_string()]);
        assert!(inst.versions_dir().join("27.4.0").exists());
        assert!(inst.versions_dir().join("27.3.1").exists());
    }

    #[test]
    fn extract_archive_unpacks_gzip_tarball() {
        let tmp = TempDir::new().unwrap();
        let archive = tmp.path().join("docker-1.0.0.tgz");
        write_bundle_archive(&archive, "docker", &[("dockerd", "#!/bin/sh\n")]);
        extract_archive(&archive, &tmp.path().join("out")).unwrap();
        assert!(tmp.path().join("out/docker/dockerd").is_file());
    }

    #[test]
    fn garbage_version_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let err = installer(&tmp)
            .install(&FakeBundleSource::complete(), "../etc", Arch::X86_64)
            .unwrap_err();
        assert!(matches!(err, UpdateError::InvalidArgument(_)));
    }
}
