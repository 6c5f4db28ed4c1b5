//! Pipeline configuration.
//!
//! `EmbedConfig` is the serde-facing shape (camelCase, every field optional
//! thanks to `#[serde(default)]`), so the content script can pass a partial
//! override object. `resolve()` validates it and compiles the selectors.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::selector::SelectorList;

/// Error text Jira renders in edit mode for a `mermaid` code macro.
pub const FORMATTER_ERROR_TEXT: &str =
    "Unable to find source-code formatter for language: mermaid.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EmbedConfig {
    /// Marker a block's trimmed text must start with.
    pub fence_open: String,
    /// Marker a block's trimmed text must end with.
    pub fence_close: String,
    /// Elements that may hold a fenced block.
    pub candidate_selector: String,
    /// Scrollable issue content watched by the page-scoped watcher.
    pub container_selector: String,
    /// Id of the description editor container.
    pub editor_container_id: String,
    /// Class the editor container carries while it is being edited.
    pub active_edit_class: String,
    /// Also look for formatter error panels inside editor frames.
    pub detect_formatter_errors: bool,
    pub formatter_error_selector: String,
    pub formatter_error_text: String,
    /// How long the bootstrap watcher waits for the container.
    pub bootstrap_timeout_ms: u64,
    /// Extension asset holding the surface template.
    pub template_path: String,
    /// CSS aspect ratio applied to inline mounts.
    pub aspect_ratio: String,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            fence_open: "```mermaid\n".into(),
            fence_close: "\n```".into(),
            candidate_selector: "code, pre".into(),
            container_selector: ".issue-body-content".into(),
            editor_container_id: "description-val".into(),
            active_edit_class: "active".into(),
            detect_formatter_errors: false,
            formatter_error_selector: ".code.panel > .error".into(),
            formatter_error_text: FORMATTER_ERROR_TEXT.into(),
            bootstrap_timeout_ms: 10_000,
            template_path: "mermaid-view.html".into(),
            aspect_ratio: "2 / 1".into(),
        }
    }
}

/// Validated configuration with compiled selectors.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub fence_open: String,
    pub fence_close: String,
    pub candidates: SelectorList,
    pub container: SelectorList,
    pub editor_container_id: String,
    pub active_edit_class: String,
    pub detect_formatter_errors: bool,
    pub formatter_errors: SelectorList,
    pub formatter_error_text: String,
    pub bootstrap_timeout: Duration,
    pub template_path: String,
    pub aspect_ratio: String,
}

impl EmbedConfig {
    pub fn resolve(self) -> Result<ResolvedConfig, ConfigError> {
        fn selectors(field: &'static str, value: &str) -> Result<SelectorList, ConfigError> {
            SelectorList::parse(value).map_err(|source| ConfigError::Selector { field, source })
        }

        for (field, value) in [
            ("fenceOpen", &self.fence_open),
            ("fenceClose", &self.fence_close),
            ("editorContainerId", &self.editor_container_id),
            ("activeEditClass", &self.active_edit_class),
            ("templatePath", &self.template_path),
        ] {
            if value.is_empty() {
                return Err(ConfigError::Empty(field));
            }
        }

        Ok(ResolvedConfig {
            candidates: selectors("candidateSelector", &self.candidate_selector)?,
            container: selectors("containerSelector", &self.container_selector)?,
            formatter_errors: selectors("formatterErrorSelector", &self.formatter_error_selector)?,
            fence_open: self.fence_open,
            fence_close: self.fence_close,
            editor_container_id: self.editor_container_id,
            active_edit_class: self.active_edit_class,
            detect_formatter_errors: self.detect_formatter_errors,
            formatter_error_text: self.formatter_error_text,
            bootstrap_timeout: Duration::from_millis(self.bootstrap_timeout_ms),
            template_path: self.template_path,
            aspect_ratio: self.aspect_ratio,
        })
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        EmbedConfig::default()
            .resolve()
            .expect("default configuration is valid")
    }
}
