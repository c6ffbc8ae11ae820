//! Tera rendering engine: [`TemplateKind`] and [`Renderer`].
//!
//! | Template     | Rendered to                                       |
//! |--------------|---------------------------------------------------|
//! | ServiceUnit  | `~/.config/systemd/user/<unit_name>`              |
//! | LimaVm       | `~/.config/dockside/lima.yaml` (then `limactl create`) |

use sha2::{Digest, Sha256};
use tera::Tera;

use dockside_core::Config;
use dockside_detect::Arch;

use crate::context::{to_tera_context, UnitContext, VmContext};
use crate::error::RenderError;

// ---------------------------------------------------------------------------
// Embedded templates, baked into the binary at compile time via include_str!
// ---------------------------------------------------------------------------

const TPLS: &[(&str, &str)] = &[
    ("docker.service.tera", include_str!("templates/docker.service.tera")),
    ("lima.yaml.tera", include_str!("templates/lima.yaml.tera")),
];

fn build_tera() -> Result<Tera, RenderError> {
    let mut tera = Tera::default();
    tera.add_raw_templates(TPLS.iter().map(|(name, body)| (*name, *body)))?;
    Ok(tera)
}

// ---------------------------------------------------------------------------
// TemplateKind
// ---------------------------------------------------------------------------

/// Every template dockside renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    ServiceUnit,
    LimaVm,
}

impl TemplateKind {
    pub fn all() -> &'static [TemplateKind] {
        &[TemplateKind::ServiceUnit, TemplateKind::LimaVm]
    }

    pub fn template_name(&self) -> &'static str {
        match self {
            TemplateKind::ServiceUnit => "docker.service.tera",
            TemplateKind::LimaVm => "lima.yaml.tera",
        }
    }
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Renders the expected unit text and VM template from a [`Config`].
///
/// Create once with [`Renderer::new`] and reuse.
pub struct Renderer {
    tera: Tera,
}

impl Renderer {
    pub fn new() -> Result<Self, RenderError> {
        Ok(Renderer { tera: build_tera()? })
    }

    /// Expected content of the systemd user unit.
    pub fn render_unit(&self, cfg: &Config) -> Result<String, RenderError> {
        let ctx = to_tera_context(&UnitContext::from_config(cfg))?;
        let rendered = self.tera.render(TemplateKind::ServiceUnit.template_name(), &ctx)?;
        Ok(normalize_line_endings(&rendered))
    }

    /// Expected content of the Lima VM template. The output is checked to
    /// parse as YAML before it is returned.
    pub fn render_vm_template(&self, cfg: &Config, arch: Arch) -> Result<String, RenderError> {
        let ctx = to_tera_context(&VmContext::from_config(cfg, arch))?;
        let rendered = self.tera.render(TemplateKind::LimaVm.template_name(), &ctx)?;
        let rendered = normalize_line_endings(&rendered);
        serde_yaml::from_str::<serde_yaml::Value>(&rendered)?;
        Ok(rendered)
    }
}

/// Hex SHA-256 of template content, after line-ending normalisation.
pub fn template_hash(content: &str) -> String {
    let mut h = Sha256::new();
    h.update(normalize_line_endings(content).as_bytes());
    hex::encode(h.finalize())
}

fn normalize_line_endings(s: &str) -> String {
    s.replace("\r\n", "\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
