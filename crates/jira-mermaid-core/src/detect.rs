//! Detection of fenced Mermaid blocks in the host page.
//!
//! Detection is split into strategies (how candidates are found) and the
//! `BlockDetector` that composes them and applies the rules every
//! candidate is subject to: the active-edit guard, de-duplication, and the
//! parent layout fix-up.

use std::sync::LazyLock;

use crate::config::ResolvedConfig;
use crate::platform::HostDocument;
use crate::selector::SelectorList;

#[cfg(not(all(target_family = "wasm", target_os = "unknown")))]
use regex::Regex;
#[cfg(all(target_family = "wasm", target_os = "unknown"))]
use regex_lite::Regex;

/// A matched element and the diagram source it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateBlock<N> {
    pub element_to_replace: N,
    pub diagram_source: String,
}

/// One way of finding candidate blocks under a subtree.
pub trait DetectStrategy<H: HostDocument> {
    fn name(&self) -> &'static str;

    /// Candidates under `root`, in document order.
    fn find_candidates(&self, host: &H, root: &H::Node) -> Vec<CandidateBlock<H::Node>>;
}

/// Strip fence markers from `text`.
///
/// The text is trimmed first. When the markers overlap (the closing
/// marker's newline is the opening marker's), the shared part is the
/// source.
pub fn extract_fenced<'a>(text: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let text = text.trim();
    if !text.starts_with(open) || !text.ends_with(close) {
        return None;
    }
    let start = open.len();
    let end = text.len() - close.len();
    Some(if start <= end {
        &text[start..end]
    } else {
        &text[end..start]
    })
}

/// Read-mode blocks: code elements whose text is a fenced block.
pub struct FencedTextStrategy {
    candidates: SelectorList,
    fence_open: String,
    fence_close: String,
}

impl FencedTextStrategy {
    pub fn new(candidates: SelectorList, fence_open: String, fence_close: String) -> Self {
        Self {
            candidates,
            fence_open,
            fence_close,
        }
    }
}

impl<H: HostDocument> DetectStrategy<H> for FencedTextStrategy {
    fn name(&self) -> &'static str {
        "fenced-text"
    }

    fn find_candidates(&self, host: &H, root: &H::Node) -> Vec<CandidateBlock<H::Node>> {
        host.query_all(root, &self.candidates)
            .into_iter()
            .filter_map(|element| {
                let text = host.text_content(&element)?;
                let source = extract_fenced(&text, &self.fence_open, &self.fence_close)?;
                Some(CandidateBlock {
                    diagram_source: source.to_string(),
                    element_to_replace: element,
                })
            })
            .collect()
    }
}

static FORMATTER_ERROR_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Unable.+yaml").expect("valid regex"));

/// Edit-mode blocks: Jira's "no formatter for mermaid" error panels inside
/// editor frames.
///
/// Frames the host refuses to expose are skipped with a warning.
pub struct FormatterErrorStrategy {
    errors: SelectorList,
    error_text: String,
}

impl FormatterErrorStrategy {
    pub fn new(errors: SelectorList, error_text: String) -> Self {
        Self { errors, error_text }
    }
}

impl<H: HostDocument> DetectStrategy<H> for FormatterErrorStrategy {
    fn name(&self) -> &'static str {
        "formatter-error"
    }

    fn find_candidates(&self, host: &H, root: &H::Node) -> Vec<CandidateBlock<H::Node>> {
        let mut blocks = Vec::new();
        for frame in host.frames(root) {
            let frame_root = match host.frame_root(&frame) {
                Ok(Some(frame_root)) => frame_root,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping inaccessible frame");
                    continue;
                }
            };

            for error in host.query_all(&frame_root, &self.errors) {
                if host.text_content(&error).as_deref() != Some(self.error_text.as_str()) {
                    continue;
                }
                let Some(panel) = host.parent(&error) else {
                    continue;
                };
                let text = host.text_content(&panel).unwrap_or_default();
                let source = FORMATTER_ERROR_PREFIX.replace(&text, "").into_owned();
                blocks.push(CandidateBlock {
                    element_to_replace: panel,
                    diagram_source: source,
                });
            }
        }
        blocks
    }
}

/// Cancels blocks living inside the description editor while it is being
/// edited.
#[derive(Debug, Clone)]
pub struct EditGuard {
    editor_container_id: String,
    active_class: String,
}

impl EditGuard {
    pub fn new(editor_container_id: impl Into<String>, active_class: impl Into<String>) -> Self {
        Self {
            editor_container_id: editor_container_id.into(),
            active_class: active_class.into(),
        }
    }

    /// Whether `node` (or the nearest ancestor that is the editor
    /// container) is in active-edit mode.
    pub fn is_editing<H: HostDocument + ?Sized>(&self, host: &H, node: &H::Node) -> bool {
        let mut current = Some(node.clone());
        while let Some(node) = current {
            if host.element_id(&node).as_deref() == Some(self.editor_container_id.as_str()) {
                return host.has_class(&node, &self.active_class);
            }
            current = host.parent(&node);
        }
        false
    }
}

/// Runs every strategy and filters the combined result.
pub struct BlockDetector<H: HostDocument> {
    strategies: Vec<Box<dyn DetectStrategy<H>>>,
    guard: EditGuard,
}

impl<H: HostDocument> BlockDetector<H> {
    pub fn new(guard: EditGuard) -> Self {
        Self {
            strategies: Vec::new(),
            guard,
        }
    }

    pub fn with_strategy(mut self, strategy: impl DetectStrategy<H> + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    /// The detector described by `config`.
    pub fn from_config(config: &ResolvedConfig) -> Self {
        let guard = EditGuard::new(&config.editor_container_id, &config.active_edit_class);
        let detector = Self::new(guard).with_strategy(FencedTextStrategy::new(
            config.candidates.clone(),
            config.fence_open.clone(),
            config.fence_close.clone(),
        ));
        if config.detect_formatter_errors {
            detector.with_strategy(FormatterErrorStrategy::new(
                config.formatter_errors.clone(),
                config.formatter_error_text.clone(),
            ))
        } else {
            detector
        }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Accepted blocks under `root`, strategy by strategy.
    ///
    /// Blocks under an actively edited editor are dropped, as are blocks
    /// already found or nested inside one already found. A block that is
    /// its parent's only element gets its parent padded so the placeholder
    /// sits cleanly.
    pub fn detect(&self, host: &H, root: &H::Node) -> Vec<CandidateBlock<H::Node>> {
        let mut accepted: Vec<CandidateBlock<H::Node>> = Vec::new();

        for strategy in &self.strategies {
            for block in strategy.find_candidates(host, root) {
                if self.guard.is_editing(host, &block.element_to_replace) {
                    tracing::debug!(
                        strategy = strategy.name(),
                        "block is in an active editor, leaving it alone"
                    );
                    continue;
                }
                if accepted
                    .iter()
                    .any(|a| is_inclusive_ancestor(host, &a.element_to_replace, &block.element_to_replace))
                {
                    continue;
                }

                if let Some(parent) = host.parent(&block.element_to_replace) {
                    if host.child_element_count(&parent) == 1 {
                        for (property, value) in [("padding", "1em"), ("display", "block")] {
                            if let Err(e) = host.set_style(&parent, property, value) {
                                tracing::warn!(error = %e, "failed to adjust block parent");
                            }
                        }
                    }
                }

                tracing::trace!(strategy = strategy.name(), "detected diagram block");
                accepted.push(block);
            }
        }

        accepted
    }
}

fn is_inclusive_ancestor<H: HostDocument + ?Sized>(
    host: &H,
    ancestor: &H::Node,
    node: &H::Node,
) -> bool {
    let mut current = Some(node.clone());
    while let Some(n) = current {
        if &n == ancestor {
            return true;
        }
        current = host.parent(&n);
    }
    false
}
