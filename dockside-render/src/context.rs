//! Template contexts: serializable rendering payloads built from [`Config`].

use serde::Serialize;

use dockside_core::Config;
use dockside_detect::Arch;

use crate::error::RenderError;

/// Payload for the systemd user unit.
#[derive(Debug, Clone, Serialize)]
pub struct UnitContext {
    pub bin_dir: String,
    pub install_current: String,
    pub socket_path: String,
    pub runtime_dir: String,
}

impl UnitContext {
    pub fn from_config(cfg: &Config) -> Self {
        let runtime_dir = cfg
            .socket_path
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        Self {
            bin_dir: cfg.bin_dir.display().to_string(),
            install_current: cfg.install_root.join("current").display().to_string(),
            socket_path: cfg.socket_path.display().to_string(),
            runtime_dir,
        }
    }
}

/// Payload for the Lima VM template.
#[derive(Debug, Clone, Serialize)]
pub struct VmContext {
    pub arch: String,
    pub cpus: u32,
    pub memory: String,
    pub disk: String,
    pub home: String,
    pub host_socket: String,
}

impl VmContext {
    pub fn from_config(cfg: &Config, arch: Arch) -> Self {
        Self {
            arch: arch.index_dir().to_string(),
            cpus: 4,
            memory: "4GiB".to_string(),
            disk: "60GiB".to_string(),
            home: cfg.home.display().to_string(),
            host_socket: cfg.vm_socket_path.display().to_string(),
        }
    }
}

pub(crate) fn to_tera_context<T: Serialize>(ctx: &T) -> Result<tera::Context, RenderError> {
    let value = serde_json::to_value(ctx)?;
    Ok(tera::Context::from_value(value)?)
}
