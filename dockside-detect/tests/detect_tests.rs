//! Parameterised host detection tests for `dockside-detect`.
//!
//! Each `#[case]` gets an isolated `TempDir` standing in for `/`.

use dockside_detect::{detect_host_at, parse_arch, Arch, DetectError, Platform};
use rstest::rstest;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helper
// ---------------------------------------------------------------------------

fn make_root() -> TempDir {
    TempDir::new().expect("tempdir")
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).expect("mkdir");
    fs::write(path, content).expect("write fixture");
}

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

#[rstest]
#[case("6.5.0-35-generic", Platform::Linux)]
#[case("5.15.153.1-microsoft-standard-WSL2", Platform::Wsl2)]
#[case("6.6.36.3-microsoft-standard-WSL2+", Platform::Wsl2)]
fn linux_flavour_from_osrelease(#[case] release: &str, #[case] expected: Platform) {
    let root = make_root();
    write(root.path(), "proc/sys/kernel/osrelease", release);
    let host = detect_host_at(root.path(), "linux", "x86_64").expect("detect");
    assert_eq!(host.platform, expected);
}

#[test]
fn falls_back_to_proc_version() {
    let root = make_root();
    write(
        root.path(),
        "proc/version",
        "Linux version 5.15.90.1-microsoft-standard-WSL2 (gcc 11.2.0)",
    );
    let host = detect_host_at(root.path(), "linux", "x86_64").expect("detect");
    assert_eq!(host.platform, Platform::Wsl2);
}

#[test]
fn plain_linux_without_indicator_files() {
    let root = make_root();
    let host = detect_host_at(root.path(), "linux", "aarch64").expect("detect");
    assert_eq!(host.platform, Platform::Linux);
    assert_eq!(host.arch, Arch::Aarch64);
}

#[test]
fn wsl1_is_rejected() {
    let root = make_root();
    write(root.path(), "proc/sys/kernel/osrelease", "4.4.0-19041-Microsoft");
    let err = detect_host_at(root.path(), "linux", "x86_64").unwrap_err();
    assert!(matches!(err, DetectError::Wsl1));
}

#[test]
fn macos_ignores_proc() {
    let root = make_root();
    let host = detect_host_at(root.path(), "macos", "aarch64").expect("detect");
    assert!(host.platform.is_macos());
}

#[test]
fn windows_is_unsupported() {
    let root = make_root();
    let err = detect_host_at(root.path(), "windows", "x86_64").unwrap_err();
    assert!(matches!(err, DetectError::UnsupportedOs { .. }));
}

// ---------------------------------------------------------------------------
// Arch
// ---------------------------------------------------------------------------

#[rstest]
#[case("x86_64", "x86_64")]
#[case("amd64", "x86_64")]
#[case("aarch64", "aarch64")]
#[case("arm64", "aarch64")]
fn arch_maps_to_index_dir(#[case] raw: &str, #[case] dir: &str) {
    assert_eq!(parse_arch(raw).expect("arch").index_dir(), dir);
}

#[test]
fn riscv_is_unsupported() {
    assert!(matches!(
        parse_arch("riscv64"),
        Err(DetectError::UnsupportedArch { .. })
    ));
}
