//! Host detection for `dockside-detect`.
//!
//! `detect_host()` decides which reconciliation path applies (native rootless
//! daemon on Linux / WSL2, Lima VM on macOS) and which CPU architecture the
//! static bundle index should be queried for. Linux flavours are told apart by
//! indicator files under `/proc`; every check takes an explicit filesystem
//! root so tests can point it at a `TempDir`.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Host operating environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    /// Linux kernel running under WSL2.
    Wsl2,
    MacOs,
}

impl Platform {
    pub fn is_macos(&self) -> bool {
        matches!(self, Platform::MacOs)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Platform::Linux => "linux",
            Platform::Wsl2 => "wsl2",
            Platform::MacOs => "macos",
        };
        f.write_str(s)
    }
}

/// CPU architecture, named the way the static bundle index names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X86_64,
    Aarch64,
}

impl Arch {
    /// Directory name under the static bundle index.
    pub fn index_dir(&self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::Aarch64 => "aarch64",
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.index_dir())
    }
}

/// Detected host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Host {
    pub platform: Platform,
    pub arch: Arch,
}

/// Errors from host detection.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported operating system '{os}'; dockside manages Linux, WSL2 and macOS hosts")]
    UnsupportedOs { os: String },

    #[error("WSL1 is not supported (no systemd); upgrade the distribution with `wsl --set-version <distro> 2`")]
    Wsl1,

    #[error("unsupported CPU architecture '{arch}'; expected x86_64 or aarch64")]
    UnsupportedArch { arch: String },
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Detect the running host.
pub fn detect_host() -> Result<Host, DetectError> {
    detect_host_at(
        Path::new("/"),
        std::env::consts::OS,
        std::env::consts::ARCH,
    )
}

/// Detect a host whose filesystem is rooted at `root`.
pub fn detect_host_at(root: &Path, os: &str, arch: &str) -> Result<Host, DetectError> {
    Ok(Host {
        platform: detect_platform(root, os)?,
        arch: parse_arch(arch)?,
    })
}

/// Map a Rust `target_arch` / `uname -m` value to an [`Arch`].
pub fn parse_arch(arch: &str) -> Result<Arch, DetectError> {
    match arch {
        "x86_64" | "amd64" => Ok(Arch::X86_64),
        "aarch64" | "arm64" => Ok(Arch::Aarch64),
        other => Err(DetectError::UnsupportedArch {
            arch: other.to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Platform detectors
// ---------------------------------------------------------------------------

fn detect_platform(root: &Path, os: &str) -> Result<Platform, DetectError> {
    match os {
        "macos" => Ok(Platform::MacOs),
        "linux" => detect_linux_flavour(root),
        other => Err(DetectError::UnsupportedOs {
            os: other.to_string(),
        }),
    }
}

fn detect_linux_flavour(root: &Path) -> Result<Platform, DetectError> {
    // Priority: the kernel release string is definitive, /proc/version is a
    // fallback for kernels that do not expose osrelease.
    let osrelease = read_optional(&root.join("proc/sys/kernel/osrelease"))?;
    let version = match osrelease {
        Some(s) => Some(s),
        None => read_optional(&root.join("proc/version"))?,
    };

    let Some(version) = version else {
        return Ok(Platform::Linux);
    };
    let lower = version.to_lowercase();

    if lower.contains("microsoft-standard") || lower.contains("wsl2") {
        return Ok(Platform::Wsl2);
    }
    if lower.contains("microsoft") {
        // WSL1 kernels report "Microsoft" but have no interop-v2 mount.
        if root.join("run/WSL").exists() {
            return Ok(Platform::Wsl2);
        }
        return Err(DetectError::Wsl1);
    }
    Ok(Platform::Linux)
}

// ---------------------------------------------------------------------------
// Utilities
// ---------------------------------------------------------------------------

fn read_optional(path: &Path) -> Result<Option<String>, DetectError> {
    match fs::read_to_string(path) {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(DetectError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
