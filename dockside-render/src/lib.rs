//! # dockside-render
//!
//! Tera-based rendering of the two artifacts whose content decides whether a
//! reconciliation step has work to do: the systemd user unit for the rootless
//! daemon, and the Lima VM template (whose content hash gates VM rebuilds).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use dockside_core::Config;
//! use dockside_detect::Arch;
//! use dockside_render::{template_hash, Renderer};
//!
//! fn expected(cfg: &Config) {
//!     if let Ok(renderer) = Renderer::new() {
//!         if let Ok(vm) = renderer.render_vm_template(cfg, Arch::Aarch64) {
//!             println!("template hash {}", template_hash(&vm));
//!         }
//!     }
//! }
//! ```

pub mod context;
pub mod engine;
pub mod error;

pub use context::{UnitContext, VmContext};
pub use engine::{template_hash, Renderer, TemplateKind};
pub use error::RenderError;
