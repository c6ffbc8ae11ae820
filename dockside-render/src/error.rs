//! Error types for dockside-render.

use thiserror::Error;

/// All errors that can arise from template rendering operations.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Tera template engine error.
    #[error("template engine error: {0}")]
    Tera(#[from] tera::Error),

    /// JSON serialization error (building tera context).
    #[error("context serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The rendered VM template is not valid YAML.
    #[error("rendered VM template is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
