//! Immutable runtime configuration.
//!
//! A [`Config`] is built exactly once by the process entry point and passed
//! by reference to every component. Values are resolved in this order:
//!
//! 1. built-in defaults rooted at the user's home directory
//! 2. `config.toml` (`$DOCKSIDE_CONFIG`, else `~/.config/dockside/config.toml`)
//! 3. environment overrides (`DOCKSIDE_CHECK_INTERVAL`)
//!
//! # API pattern
//!
//! As with the rest of the workspace, functions taking an explicit `home`
//! (`load_at`, `defaults_at`) are the ones tests use; [`Config::load`] derives
//! home and environment from the running process.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{io_err, CoreError};

pub const CONFIG_ENV: &str = "DOCKSIDE_CONFIG";
pub const CHECK_INTERVAL_ENV: &str = "DOCKSIDE_CHECK_INTERVAL";
pub const DEFAULT_INDEX_URL: &str = "https://download.docker.com/linux/static/stable";
pub const DEFAULT_CONTEXT_NAME: &str = "dockside";
pub const DEFAULT_UNIT_NAME: &str = "dockside-docker.service";

// ---------------------------------------------------------------------------
// CheckInterval
// ---------------------------------------------------------------------------

/// How often the pre-command check may query the remote index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckInterval {
    Hourly,
    #[default]
    Daily,
    Weekly,
    Never,
}

impl CheckInterval {
    /// Interval length in seconds; `None` for [`CheckInterval::Never`].
    pub fn as_secs(&self) -> Option<u64> {
        match self {
            CheckInterval::Hourly => Some(3_600),
            CheckInterval::Daily => Some(86_400),
            CheckInterval::Weekly => Some(604_800),
            CheckInterval::Never => None,
        }
    }
}

impl FromStr for CheckInterval {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hourly" => Ok(CheckInterval::Hourly),
            "daily" => Ok(CheckInterval::Daily),
            "weekly" => Ok(CheckInterval::Weekly),
            "never" => Ok(CheckInterval::Never),
            other => Err(CoreError::InvalidValue {
                key: "update.check_interval".to_string(),
                value: other.to_string(),
                expected: "hourly, daily, weekly or never",
            }),
        }
    }
}

impl fmt::Display for CheckInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckInterval::Hourly => "hourly",
            CheckInterval::Daily => "daily",
            CheckInterval::Weekly => "weekly",
            CheckInterval::Never => "never",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// WaitPolicy
// ---------------------------------------------------------------------------

/// Bounded polling: `attempts` checks spaced `interval` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl WaitPolicy {
    pub const SOCKET: WaitPolicy = WaitPolicy {
        attempts: 30,
        interval: Duration::from_secs(1),
    };

    pub const VM: WaitPolicy = WaitPolicy {
        attempts: 90,
        interval: Duration::from_secs(2),
    };

    pub fn timeout(&self) -> Duration {
        self.interval * self.attempts
    }
}

// ---------------------------------------------------------------------------
// Settings (on-disk TOML shape)
// ---------------------------------------------------------------------------

/// `config.toml` contents. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub paths: PathSettings,
    pub daemon: DaemonSettings,
    pub context: ContextSettings,
    pub vm: VmSettings,
    pub update: UpdateSettings,
    pub cleanup: CleanupSettings,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathSettings {
    pub state_dir: Option<PathBuf>,
    pub install_root: Option<PathBuf>,
    pub bin_dir: Option<PathBuf>,
    pub host_contexts: Option<PathBuf>,
    pub sandbox_contexts: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonSettings {
    pub unit_name: Option<String>,
    pub socket: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ContextSettings {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct VmSettings {
    pub name: Option<String>,
    pub legacy_name: Option<String>,
    pub template: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct UpdateSettings {
    pub check_interval: Option<String>,
    pub index_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct CleanupSettings {
    pub legacy_paths: Vec<PathBuf>,
}

// ---------------------------------------------------------------------------
// Environment overrides
// ---------------------------------------------------------------------------

/// Process environment values that feed into [`Config`].
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub config_path: Option<PathBuf>,
    pub check_interval: Option<String>,
    pub runtime_dir: Option<PathBuf>,
}

impl EnvOverrides {
    pub fn from_process() -> Self {
        let non_empty = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        Self {
            config_path: non_empty(CONFIG_ENV).map(PathBuf::from),
            check_interval: non_empty(CHECK_INTERVAL_ENV),
            runtime_dir: non_empty("XDG_RUNTIME_DIR").map(PathBuf::from),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Fully resolved configuration shared by every component.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub home: PathBuf,
    /// Persisted engine state (check state, template hash, version marker).
    pub state_dir: PathBuf,
    /// Bundle install tree: `versions/<ver>/` plus the `current` symlink.
    pub install_root: PathBuf,
    /// Directory holding per-binary symlinks into `install_root/current`.
    pub bin_dir: PathBuf,
    pub unit_name: String,
    pub unit_path: PathBuf,
    /// Rootless daemon socket on Linux / WSL2.
    pub socket_path: PathBuf,
    /// Managed CLI context; also the reserved name the mirror never copies.
    pub context_name: String,
    pub host_contexts: PathBuf,
    pub sandbox_contexts: PathBuf,
    pub vm_name: String,
    pub vm_template_path: PathBuf,
    pub vm_socket_path: PathBuf,
    pub legacy_vm_name: Option<String>,
    pub legacy_paths: Vec<PathBuf>,
    pub index_url: String,
    pub check_interval: CheckInterval,
    pub socket_wait: WaitPolicy,
    pub vm_wait: WaitPolicy,
}

impl Config {
    /// Built-in defaults for `home`. `runtime_dir` is `$XDG_RUNTIME_DIR`.
    pub fn defaults_at(home: &Path, runtime_dir: Option<&Path>) -> Self {
        let socket_dir = runtime_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| home.join(".docker").join("run"));
        let vm_name = DEFAULT_CONTEXT_NAME.to_string();
        Self {
            home: home.to_path_buf(),
            state_dir: home.join(".local").join("state").join("dockside"),
            install_root: home.join(".local").join("share").join("dockside").join("docker"),
            bin_dir: home.join(".local").join("bin"),
            unit_name: DEFAULT_UNIT_NAME.to_string(),
            unit_path: unit_dir(home).join(DEFAULT_UNIT_NAME),
            socket_path: socket_dir.join("docker.sock"),
            context_name: DEFAULT_CONTEXT_NAME.to_string(),
            host_contexts: home.join(".docker").join("contexts"),
            sandbox_contexts: home
                .join(".dockside")
                .join("sandbox")
                .join("docker")
                .join("contexts"),
            vm_template_path: config_dir(home).join("lima.yaml"),
            vm_socket_path: lima_socket(home, &vm_name),
            vm_name,
            legacy_vm_name: None,
            legacy_paths: Vec::new(),
            index_url: DEFAULT_INDEX_URL.to_string(),
            check_interval: CheckInterval::default(),
            socket_wait: WaitPolicy::SOCKET,
            vm_wait: WaitPolicy::VM,
        }
    }

    /// Resolve configuration from the running process.
    pub fn load() -> Result<Self, CoreError> {
        let home = dirs::home_dir().ok_or(CoreError::HomeNotFound)?;
        Self::load_at(&home, &EnvOverrides::from_process())
    }

    /// Resolve configuration for `home` with explicit environment values.
    pub fn load_at(home: &Path, env: &EnvOverrides) -> Result<Self, CoreError> {
        let settings = match find_config(home, env.config_path.as_deref()) {
            Some(path) => load_settings(&path)?,
            None => Settings::default(),
        };
        Self::from_settings(home, &settings, env)
    }

    /// Apply `settings` and `env` on top of the defaults for `home`.
    pub fn from_settings(
        home: &Path,
        settings: &Settings,
        env: &EnvOverrides,
    ) -> Result<Self, CoreError> {
        let mut cfg = Self::defaults_at(home, env.runtime_dir.as_deref());
        let expand = |p: &PathBuf| expand_home(p, home);

        let paths = &settings.paths;
        if let Some(p) = &paths.state_dir {
            cfg.state_dir = expand(p);
        }
        if let Some(p) = &paths.install_root {
            cfg.install_root = expand(p);
        }
        if let Some(p) = &paths.bin_dir {
            cfg.bin_dir = expand(p);
        }
        if let Some(p) = &paths.host_contexts {
            cfg.host_contexts = expand(p);
        }
        if let Some(p) = &paths.sandbox_contexts {
            cfg.sandbox_contexts = expand(p);
        }

        if let Some(unit) = &settings.daemon.unit_name {
            cfg.unit_path = unit_dir(home).join(unit);
            cfg.unit_name = unit.clone();
        }
        if let Some(socket) = &settings.daemon.socket {
            cfg.socket_path = expand(socket);
        }
        if let Some(name) = &settings.context.name {
            cfg.context_name = name.clone();
        }
        if let Some(name) = &settings.vm.name {
            cfg.vm_socket_path = lima_socket(home, name);
            cfg.vm_name = name.clone();
        }
        if let Some(template) = &settings.vm.template {
            cfg.vm_template_path = expand(template);
        }
        cfg.legacy_vm_name = settings.vm.legacy_name.clone();
        cfg.legacy_paths = settings.cleanup.legacy_paths.iter().map(expand).collect();

        if let Some(url) = &settings.update.index_url {
            cfg.index_url = url.trim_end_matches('/').to_string();
        }

        // The environment wins over the file.
        let interval = env
            .check_interval
            .as_deref()
            .or(settings.update.check_interval.as_deref());
        if let Some(raw) = interval {
            cfg.check_interval = raw.parse()?;
        }

        Ok(cfg)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    pub fn run_dir(&self) -> PathBuf {
        self.state_dir.join("run")
    }
}

// ---------------------------------------------------------------------------
// Config file lookup
// ---------------------------------------------------------------------------

/// `~/.config/dockside/`
pub fn config_dir(home: &Path) -> PathBuf {
    home.join(".config").join("dockside")
}

fn unit_dir(home: &Path) -> PathBuf {
    home.join(".config").join("systemd").join("user")
}

fn lima_socket(home: &Path, vm_name: &str) -> PathBuf {
    home.join(".lima").join(vm_name).join("sock").join("docker.sock")
}

fn expand_home(path: &Path, home: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home.join(rest),
        Err(_) => path.to_path_buf(),
    }
}

/// Locate the config file: an explicit path wins when it exists, else
/// `~/.config/dockside/config.toml`. Returns `None` when neither exists.
pub fn find_config(home: &Path, explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        let path = expand_home(path, home);
        return path.is_file().then_some(path);
    }
    let default = config_dir(home).join("config.toml");
    default.is_file().then_some(default)
}

pub fn load_settings(path: &Path) -> Result<Settings, CoreError> {
    let raw = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    toml::from_str(&raw).map_err(|source| CoreError::ConfigParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Read a single dotted key (e.g. `update.check_interval`) from a config
/// file as a string. Missing keys and non-scalar values yield `None`.
pub fn config_value(path: &Path, key: &str) -> Result<Option<String>, CoreError> {
    let raw = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    let root: toml::Table = toml::from_str(&raw).map_err(|source| CoreError::ConfigParse {
        path: path.to_path_buf(),
        source,
    })?;

    let mut parts = key.split('.');
    let Some(first) = parts.next() else {
        return Ok(None);
    };
    let mut current = root.get(first);
    for part in parts {
        current = current.and_then(|v| v.get(part));
    }

    Ok(current.and_then(|v| match v {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        _ => None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    fn write_config(home: &Path, body: &str) -> PathBuf {
        let path = config_dir(home).join("config.toml");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, body).unwrap();
        path
    }

    #[rstest]
    #[case("hourly", Some(3_600))]
    #[case("daily", Some(86_400))]
    #[case("WEEKLY", Some(604_800))]
    #[case("never", None)]
    fn interval_parses(#[case] raw: &str, #[case] secs: Option<u64>) {
        let interval: CheckInterval = raw.parse().unwrap();
        assert_eq!(interval.as_secs(), secs);
    }

    #[test]
    fn unknown_interval_is_rejected() {
        assert!("fortnightly".parse::<CheckInterval>().is_err());
    }

    #[test]
    fn defaults_without_config_file() {
        let home = TempDir::new().unwrap();
        let cfg = Config::load_at(home.path(), &EnvOverrides::default()).unwrap();
        assert_eq!(cfg.context_name, "dockside");
        assert_eq!(cfg.check_interval, CheckInterval::Daily);
        assert_eq!(cfg.host_contexts, home.path().join(".docker/contexts"));
        assert_eq!(cfg.socket_path, home.path().join(".docker/run/docker.sock"));
        assert_eq!(cfg.socket_wait, WaitPolicy::SOCKET);
    }

    #[test]
    fn runtime_dir_sets_socket() {
        let home = TempDir::new().unwrap();
        let env = EnvOverrides {
            runtime_dir: Some(PathBuf::from("/run/user/1000")),
            ..Default::default()
        };
        let cfg = Config::load_at(home.path(), &env).unwrap();
        assert_eq!(cfg.socket_path, PathBuf::from("/run/user/1000/docker.sock"));
    }

    #[test]
    fn file_values_apply_and_expand_home() {
        let home = TempDir::new().unwrap();
        write_config(
            home.path(),
            r#"
[paths]
sandbox_contexts = "~/sandbox/contexts"

[vm]
name = "builder"
legacy_name = "docker"

[update]
check_interval = "weekly"
index_url = "https://mirror.example/static/stable/"

[cleanup]
legacy_paths = ["~/.docker-rootless"]
"#,
        );
        let cfg = Config::load_at(home.path(), &EnvOverrides::default()).unwrap();
        assert_eq!(cfg.sandbox_contexts, home.path().join("sandbox/contexts"));
        assert_eq!(cfg.vm_name, "builder");
        assert_eq!(cfg.vm_socket_path, home.path().join(".lima/builder/sock/docker.sock"));
        assert_eq!(cfg.legacy_vm_name.as_deref(), Some("docker"));
        assert_eq!(cfg.check_interval, CheckInterval::Weekly);
        assert_eq!(cfg.index_url, "https://mirror.example/static/stable");
        assert_eq!(cfg.legacy_paths, vec![home.path().join(".docker-rootless")]);
    }

    #[test]
    fn env_interval_overrides_file() {
        let home = TempDir::new().unwrap();
        write_config(home.path(), "[update]\ncheck_interval = \"weekly\"\n");
        let env = EnvOverrides {
            check_interval: Some("never".to_string()),
            ..Default::default()
        };
        let cfg = Config::load_at(home.path(), &env).unwrap();
        assert_eq!(cfg.check_interval, CheckInterval::Never);
    }

    #[test]
    fn explicit_config_path_is_used() {
        let home = TempDir::new().unwrap();
        let custom = home.path().join("custom.toml");
        std::fs::write(&custom, "[context]\nname = \"rootless\"\n").unwrap();
        let env = EnvOverrides {
            config_path: Some(custom),
            ..Default::default()
        };
        let cfg = Config::load_at(home.path(), &env).unwrap();
        assert_eq!(cfg.context_name, "rootless");
    }

    #[test]
    fn malformed_config_reports_path() {
        let home = TempDir::new().unwrap();
        let path = write_config(home.path(), "[update\n");
        let err = Config::load_at(home.path(), &EnvOverrides::default()).unwrap_err();
        match err {
            CoreError::ConfigParse { path: p, .. } => assert_eq!(p, path),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn config_value_reads_dotted_keys() {
        let home = TempDir::new().unwrap();
        let path = write_config(home.path(), "[update]\ncheck_interval = \"hourly\"\n");
        assert_eq!(
            config_value(&path, "update.check_interval").unwrap().as_deref(),
            Some("hourly")
        );
        assert_eq!(config_value(&path, "update.missing").unwrap(), None);
        assert_eq!(config_value(&path, "update").unwrap(), None);
    }
}
