//! Error types for the pipeline.

use crate::platform::PlatformError;
use crate::selector::SelectorError;

/// Failure to obtain or fill in the surface template.
///
/// `Clone` because every render awaiting the shared template fetch gets its
/// own copy of the outcome.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("failed to fetch template {path:?}: {source}")]
    Fetch {
        path: String,
        #[source]
        source: PlatformError,
    },
    #[error("failed to encode diagram source: {0}")]
    Encode(String),
}

/// Failure of a single render.
#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// Invalid configuration.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid selector for `{field}`: {source}")]
    Selector {
        field: &'static str,
        #[source]
        source: SelectorError,
    },
    #[error("`{0}` must not be empty")]
    Empty(&'static str),
}
