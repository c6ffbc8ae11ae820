//! External systems the reconciliation steps talk to.
//!
//! Each collaborator is a trait with one real implementation that shells out
//! to the tool's command-line surface (`systemctl --user`, `docker context`,
//! `limactl`) or touches the network. Tests substitute the fakes in
//! `crate::testing`.

use std::fs;
use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use dockside_core::WaitPolicy;
use dockside_detect::Arch;

use crate::error::{io_err, UpdateError};

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

pub trait ServiceManager {
    fn is_available(&self) -> bool;
    fn daemon_reload(&self) -> Result<(), UpdateError>;
    fn restart(&self, unit: &str) -> Result<(), UpdateError>;
}

pub trait ContextStore {
    /// Docker endpoint of context `name`, or `None` when it does not exist.
    fn endpoint(&self, name: &str) -> Result<Option<String>, UpdateError>;
    fn create(&self, name: &str, endpoint: &str) -> Result<(), UpdateError>;
    fn remove(&self, name: &str) -> Result<(), UpdateError>;
    fn current(&self) -> Result<String, UpdateError>;
    fn select(&self, name: &str) -> Result<(), UpdateError>;
    /// `docker --context <name> info`.
    fn ping(&self, name: &str) -> Result<(), UpdateError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Missing,
    Stopped,
    Running,
}

pub trait VmManager {
    fn is_available(&self) -> bool;
    fn state(&self, name: &str) -> Result<VmState, UpdateError>;
    fn create(&self, name: &str, template: &Path) -> Result<(), UpdateError>;
    fn start(&self, name: &str) -> Result<(), UpdateError>;
    fn stop(&self, name: &str) -> Result<(), UpdateError>;
    fn delete(&self, name: &str) -> Result<(), UpdateError>;
    /// Non-destructive in-VM package upgrade.
    fn upgrade_packages(&self, name: &str) -> Result<(), UpdateError>;
}

pub trait Prompter {
    fn confirm(&self, question: &str) -> Result<bool, UpdateError>;
}

pub trait BundleSource {
    /// Download every archive of `version` for `arch` into `dest`, returning
    /// their paths.
    fn download(&self, version: &str, arch: Arch, dest: &Path) -> Result<Vec<PathBuf>, UpdateError>;
}

pub trait VersionIndex {
    /// Newest bundle version published for `arch`.
    fn latest_version(&self, arch: Arch) -> Result<String, UpdateError>;
}

pub trait SocketProbe {
    fn is_ready(&self, path: &Path) -> bool;
}

/// Poll `probe` until `path` is ready or the policy runs out.
pub fn wait_for_socket(probe: &dyn SocketProbe, path: &Path, policy: WaitPolicy) -> bool {
    for attempt in 0..policy.attempts.max(1) {
        if probe.is_ready(path) {
            return true;
        }
        if attempt + 1 < policy.attempts {
            std::thread::sleep(policy.interval);
        }
    }
    false
}

// ---------------------------------------------------------------------------
// Command helper
// ---------------------------------------------------------------------------

fn run_tool(program: &str, args: &[&str]) -> Result<String, UpdateError> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| io_err(program, e))?;

    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Err(UpdateError::Command {
        program: program.to_string(),
        message: format!("{} (status {}): {} {}", args.join(" "), output.status, stdout, stderr)
            .trim_end()
            .to_string(),
    })
}

fn tool_on_path(program: &str, probe_arg: &str) -> bool {
    Command::new(program)
        .arg(probe_arg)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// systemd
// ---------------------------------------------------------------------------

/// `systemctl --user`.
#[derive(Debug, Default)]
pub struct SystemdUser;

impl ServiceManager for SystemdUser {
    fn is_available(&self) -> bool {
        Command::new("systemctl")
            .args(["--user", "show-environment"])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn daemon_reload(&self) -> Result<(), UpdateError> {
        run_tool("systemctl", &["--user", "daemon-reload"]).map(drop)
    }

    fn restart(&self, unit: &str) -> Result<(), UpdateError> {
        run_tool("systemctl", &["--user", "restart", unit]).map(drop)
    }
}

// ---------------------------------------------------------------------------
// docker context
// ---------------------------------------------------------------------------

/// The `docker context` subcommands.
#[derive(Debug, Default)]
pub struct DockerCli;

impl ContextStore for DockerCli {
    fn endpoint(&self, name: &str) -> Result<Option<String>, UpdateError> {
        let output = Command::new("docker")
            .args(["context", "inspect", name, "--format", "{{.Endpoints.docker.Host}}"])
            .output()
            .map_err(|e| io_err("docker", e))?;
        if !output.status.success() {
            return Ok(None);
        }
        let host = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(Some(host))
    }

    fn create(&self, name: &str, endpoint: &str) -> Result<(), UpdateError> {
        let docker_arg = format!("host={endpoint}");
        run_tool("docker", &["context", "create", name, "--docker", &docker_arg]).map(drop)
    }

    fn remove(&self, name: &str) -> Result<(), UpdateError> {
        run_tool("docker", &["context", "rm", "--force", name]).map(drop)
    }

    fn current(&self) -> Result<String, UpdateError> {
        run_tool("docker", &["context", "show"])
    }

    fn select(&self, name: &str) -> Result<(), UpdateError> {
        run_tool("docker", &["context", "use", name]).map(drop)
    }

    fn ping(&self, name: &str) -> Result<(), UpdateError> {
        run_tool("docker", &["--context", name, "info", "--format", "{{.ServerVersion}}"]).map(drop)
    }
}

// ---------------------------------------------------------------------------
// Lima
// ---------------------------------------------------------------------------

/// `limactl`.
#[derive(Debug, Default)]
pub struct Limactl;

impl VmManager for Limactl {
    fn is_available(&self) -> bool {
        tool_on_path("limactl", "--version")
    }

    fn state(&self, name: &str) -> Result<VmState, UpdateError> {
        let listing = run_tool("limactl", &["list", "--format", "{{.Name}} {{.Status}}"])?;
        Ok(parse_lima_listing(&listing, name))
    }

    fn create(&self, name: &str, template: &Path) -> Result<(), UpdateError> {
        let name_arg = format!("--name={name}");
        let template = template.to_string_lossy();
        run_tool("limactl", &["start", "--tty=false", &name_arg, &template]).map(drop)
    }

    fn start(&self, name: &str) -> Result<(), UpdateError> {
        run_tool("limactl", &["start", "--tty=false", name]).map(drop)
    }

    fn stop(&self, name: &str) -> Result<(), UpdateError> {
        run_tool("limactl", &["stop", name]).map(drop)
    }

    fn delete(&self, name: &str) -> Result<(), UpdateError> {
        run_tool("limactl", &["delete", "--force", name]).map(drop)
    }

    fn upgrade_packages(&self, name: &str) -> Result<(), UpdateError> {
        run_tool(
            "limactl",
            &[
                "shell",
                name,
                "sudo",
                "sh",
                "-c",
                "DEBIAN_FRONTEND=noninteractive apt-get update -qq && \
                 DEBIAN_FRONTEND=noninteractive apt-get install -y -qq --only-upgrade \
                 docker-ce docker-ce-cli containerd.io docker-ce-rootless-extras",
            ],
        )
        .map(drop)
    }
}

/// State of VM `name` in `limactl list` output (`<name> <status>` lines).
pub fn parse_lima_listing(listing: &str, name: &str) -> VmState {
    listing
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            Some((parts.next()?, parts.next().unwrap_or("")))
        })
        .find(|(vm, _)| *vm == name)
        .map(|(_, status)| {
            if status.eq_ignore_ascii_case("running") {
                VmState::Running
            } else {
                VmState::Stopped
            }
        })
        .unwrap_or(VmState::Missing)
}

// ---------------------------------------------------------------------------
// Prompting
// ---------------------------------------------------------------------------

pub const ASSUME_YES_ENV: &str = "DOCKSIDE_ASSUME_YES";

/// Asks on the terminal. Without a terminal the answer is "no", unless
/// `DOCKSIDE_ASSUME_YES` is set.
#[derive(Debug, Default)]
pub struct TtyPrompter {
    pub assume_yes: bool,
}

impl TtyPrompter {
    pub fn from_env() -> Self {
        let assume_yes = std::env::var(ASSUME_YES_ENV)
            .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
            .unwrap_or(false);
        Self { assume_yes }
    }
}

impl Prompter for TtyPrompter {
    fn confirm(&self, question: &str) -> Result<bool, UpdateError> {
        if self.assume_yes {
            return Ok(true);
        }
        let stdin = std::io::stdin();
        if !stdin.is_terminal() {
            tracing::warn!("no terminal to confirm `{question}`; set {ASSUME_YES_ENV}=1 to proceed");
            return Ok(false);
        }
        let mut stderr = std::io::stderr();
        write!(stderr, "{question} [y/N] ").map_err(|e| io_err("stderr", e))?;
        stderr.flush().map_err(|e| io_err("stderr", e))?;
        let mut answer = String::new();
        stdin
            .lock()
            .read_line(&mut answer)
            .map_err(|e| io_err("stdin", e))?;
        Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
pub const INDEX_TIMEOUT: Duration = Duration::from_secs(5);
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// The static bundle index, e.g. `https://download.docker.com/linux/static/stable`.
#[derive(Debug, Clone)]
pub struct HttpIndex {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpIndex {
    pub fn new(base_url: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout(INDEX_TIMEOUT)
            .build();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            agent,
        }
    }

    fn listing_url(&self, arch: Arch) -> String {
        format!("{}/{}/", self.base_url, arch.index_dir())
    }
}

impl VersionIndex for HttpIndex {
    fn latest_version(&self, arch: Arch) -> Result<String, UpdateError> {
        let url = self.listing_url(arch);
        let body = self
            .agent
            .get(&url)
            .call()
            .map_err(|e| UpdateError::Network(format!("GET {url}: {e}")))?
            .into_string()
            .map_err(|e| UpdateError::Network(format!("reading {url}: {e}")))?;
        crate::oracle::parse_index_listing(&body)
    }
}

/// Downloads `docker-<v>.tgz` and `docker-rootless-extras-<v>.tgz`.
#[derive(Debug, Clone)]
pub struct HttpBundleSource {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpBundleSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout(DOWNLOAD_TIMEOUT)
            .build();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            agent,
        }
    }
}

pub fn archive_names(version: &str) -> [String; 2] {
    [
        format!("docker-{version}.tgz"),
        format!("docker-rootless-extras-{version}.tgz"),
    ]
}

impl BundleSource for HttpBundleSource {
    fn download(&self, version: &str, arch: Arch, dest: &Path) -> Result<Vec<PathBuf>, UpdateError> {
        fs::create_dir_all(dest).map_err(|e| io_err(dest, e))?;
        let mut paths = Vec::new();
        for name in archive_names(version) {
            let url = format!("{}/{}/{}", self.base_url, arch.index_dir(), name);
            tracing::info!("downloading {url}");
            let response = self
                .agent
                .get(&url)
                .call()
                .map_err(|e| UpdateError::Network(format!("GET {url}: {e}")))?;
            let path = dest.join(&name);
            let mut file = fs::File::create(&path).map_err(|e| io_err(&path, e))?;
            std::io::copy(&mut response.into_reader(), &mut file)
                .map_err(|e| UpdateError::Network(format!("downloading {url}: {e}")))?;
            paths.push(path);
        }
        Ok(paths)
    }
}

// ---------------------------------------------------------------------------
// Sockets
// ---------------------------------------------------------------------------

/// Ready means a unix socket exists at the path.
#[derive(Debug, Default)]
pub struct FsSocketProbe;

impl SocketProbe for FsSocketProbe {
    #[cfg(unix)]
    fn is_ready(&self, path: &Path) -> bool {
        use std::os::unix::fs::FileTypeExt;
        fs::metadata(path)
            .map(|m| m.file_type().is_socket())
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    fn is_ready(&self, path: &Path) -> bool {
        path.exists()
    }
}

// ---------------------------------------------------------------------------
// Bundle of collaborators handed to steps
// ---------------------------------------------------------------------------

/// Borrowed collaborator set for one update run.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub services: &'a dyn ServiceManager,
    pub contexts: &'a dyn ContextStore,
    pub vms: &'a dyn VmManager,
    pub prompter: &'a dyn Prompter,
    pub bundles: &'a dyn BundleSource,
    pub index: &'a dyn VersionIndex,
    pub sockets: &'a dyn SocketProbe,
}

/// Owned real implementations, for the binary.
pub struct SystemCollaborators {
    pub services: SystemdUser,
    pub contexts: DockerCli,
    pub vms: Limactl,
    pub prompter: TtyPrompter,
    pub bundles: HttpBundleSource,
    pub index: HttpIndex,
    pub sockets: FsSocketProbe,
}

impl SystemCollaborators {
    pub fn new(index_url: &str) -> Self {
        Self {
            services: SystemdUser,
            contexts: DockerCli,
            vms: Limactl,
            prompter: TtyPrompter::from_env(),
            bundles: HttpBundleSource::new(index_url),
            index: HttpIndex::new(index_url),
            sockets: FsSocketProbe,
        }
    }

    pub fn borrow(&self) -> Collaborators<'_> {
        Collaborators {
            services: &self.services,
            contexts: &self.contexts,
            vms: &self.vms,
            prompter: &self.prompter,
            bundles: &self.bundles,
            index: &self.index,
            sockets: &self.sockets,
        }
    }
}
