//! Write-temp-then-rename helpers.
//!
//! Every persisted file dockside owns goes through [`atomic_write`]: content
//! lands in a uniquely named `.<name>.*.dockside.tmp` sibling (same
//! directory, same filesystem) and is renamed over the final path, so a
//! concurrent reader sees either the old file or the new one, never a partial
//! write. Concurrent writers each get their own temp file.

use std::io::Write;
use std::path::Path;

use crate::error::{io_err, CoreError};

/// Suffix shared by every temp sibling this module creates.
pub const TMP_SUFFIX: &str = ".dockside.tmp";

/// Mode for newly created files; existing files keep theirs.
#[cfg(unix)]
const DEFAULT_MODE: u32 = 0o644;

fn parent_of(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Atomically replace `path` with `contents`, creating parent directories.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<(), CoreError> {
    let parent = parent_of(path);
    std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;

    // Dropping `tmp` on any early return removes the temp file.
    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{}.", file_name_of(path)))
        .suffix(TMP_SUFFIX)
        .tempfile_in(parent)
        .map_err(|e| io_err(parent, e))?;
    tmp.write_all(contents).map_err(|e| io_err(tmp.path(), e))?;
    tmp.as_file().sync_all().map_err(|e| io_err(tmp.path(), e))?;
    keep_mode(path, tmp.path())?;
    tmp.persist(path).map_err(|e| io_err(path, e.error))?;
    Ok(())
}

#[cfg(unix)]
fn keep_mode(path: &Path, tmp: &Path) -> Result<(), CoreError> {
    use std::os::unix::fs::PermissionsExt;
    let mode = std::fs::metadata(path)
        .map(|m| m.permissions().mode())
        .unwrap_or(DEFAULT_MODE);
    set_mode(tmp, mode)
}

#[cfg(not(unix))]
fn keep_mode(_path: &Path, _tmp: &Path) -> Result<(), CoreError> {
    Ok(())
}

/// Atomically point the symlink `link` at `target`.
///
/// The new link is created under a temp name next to `link` and renamed over
/// it, so `link` always resolves to either the old or the new target.
#[cfg(unix)]
pub fn atomic_symlink(target: &Path, link: &Path) -> Result<(), CoreError> {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    static SEQ: AtomicU64 = AtomicU64::new(0);

    let parent = parent_of(link);
    std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    let tmp: PathBuf = parent.join(format!(
        ".{}.{}.{}{TMP_SUFFIX}",
        file_name_of(link),
        std::process::id(),
        SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    std::os::unix::fs::symlink(target, &tmp).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, link) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(link, e));
    }
    Ok(())
}

/// Set unix permission bits on `path`. No-op elsewhere.
#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> Result<(), CoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
pub fn set_mode(_path: &Path, _mode: u32) -> Result<(), CoreError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn leftovers(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(TMP_SUFFIX))
            .collect()
    }

    #[test]
    fn writes_and_cleans_up_tmp() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("marker");
        atomic_write(&path, b"24.0.7\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "24.0.7\n");
        assert!(leftovers(path.parent().unwrap()).is_empty());
    }

    #[test]
    fn overwrite_replaces_content() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("marker");
        atomic_write(&path, b"old").unwrap();
        atomic_write(&path, b"new").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
    }

    #[test]
    fn concurrent_writers_never_publish_a_torn_file() {
        let tmp = TempDir::new().unwrap();
        let path = Arc::new(tmp.path().join("check-state"));
        let bodies: Vec<String> = (0..8).map(|i| format!("{i}").repeat(4096)).collect();

        let handles: Vec<_> = bodies
            .iter()
            .cloned()
            .map(|body| {
                let path = Arc::clone(&path);
                std::thread::spawn(move || {
                    for _ in 0..20 {
                        atomic_write(&path, body.as_bytes()).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let final_body = fs::read_to_string(path.as_ref()).unwrap();
        assert!(bodies.contains(&final_body), "torn write published");
        assert!(leftovers(tmp.path()).is_empty());
    }

    #[test]
    #[cfg(unix)]
    fn existing_mode_is_kept_and_new_files_are_world_readable() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let fresh = tmp.path().join("fresh");
        atomic_write(&fresh, b"x").unwrap();
        assert_eq!(fs::metadata(&fresh).unwrap().permissions().mode() & 0o777, 0o644);

        set_mode(&fresh, 0o600).unwrap();
        atomic_write(&fresh, b"y").unwrap();
        assert_eq!(fs::metadata(&fresh).unwrap().permissions().mode() & 0o777, 0o600);
    }

    #[test]
    #[cfg(unix)]
    fn failed_write_leaves_original_and_no_tmp() {
        use std::os::unix::fs::PermissionsExt;

        let root = TempDir::new().unwrap();
        let readonly_dir = root.path().join("readonly");
        fs::create_dir_all(&readonly_dir).unwrap();
        let path = readonly_dir.join("marker");
        fs::write(&path, "original").unwrap();

        let mut perms = fs::metadata(&readonly_dir).unwrap().permissions();
        perms.set_mode(0o555);
        fs::set_permissions(&readonly_dir, perms).unwrap();

        let result = atomic_write(&path, b"new");

        let mut perms = fs::metadata(&readonly_dir).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&readonly_dir, perms).unwrap();

        // Running as root bypasses directory permissions.
        if result.is_err() {
            assert_eq!(fs::read_to_string(&path).unwrap(), "original");
            assert!(leftovers(&readonly_dir).is_empty(), "tmp should be cleaned up");
        }
    }

    #[test]
    #[cfg(unix)]
    fn symlink_is_repointed() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        fs::create_dir_all(&a).unwrap();
        fs::create_dir_all(&b).unwrap();
        let link = tmp.path().join("current");

        atomic_symlink(&a, &link).unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), a);
        atomic_symlink(&b, &link).unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), b);
        assert!(leftovers(tmp.path()).is_empty());
    }
}
