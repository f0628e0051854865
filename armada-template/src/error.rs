//! Error types for armada-template.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    /// Tera template engine error.
    #[error("template engine error: {0}")]
    Tera(#[from] tera::Error),

    /// JSON serialization error (building tera context).
    #[error("context serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A template field rendered to an empty string.
    #[error("template field '{0}' rendered empty")]
    Empty(&'static str),
}
