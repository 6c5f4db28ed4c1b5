//! Disclosure placeholders that replace detected blocks.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::LazyLock;

use futures::future::LocalBoxFuture;
use futures::FutureExt;

use crate::detect::CandidateBlock;
use crate::platform::{HostDocument, PlatformError};
use crate::registry::RenderLifecycle;

#[cfg(not(all(target_family = "wasm", target_os = "unknown")))]
use regex::Regex;
#[cfg(all(target_family = "wasm", target_os = "unknown"))]
use regex_lite::Regex;

pub const ATTRIBUTION: &str =
    r#"Mermaid Diagram (Powered by the "Mermaid in Jira" Chrome Extension)"#;

/// Scoped styles inserted right before each disclosure.
pub const DISCLOSURE_STYLE: &str = r"
  details:open > summary {
    padding-bottom: 1em;
    position: relative;
  }

  details > summary {
    display: flex;
    align-items: center;
  }

  details > summary:hover {
    cursor: grab;
  }

  details > summary::before {
    display: inline-block;
    content: '\279C';
    margin-right: 1em;
    font-size: 2em;
    transition: transform 100ms;
  }

  details:open > summary::before {
    transform: rotate(90deg);
  }
";

const SUMMARY_TEXT_STYLE: [(&str, &str); 3] = [
    ("text-overflow", "ellipsis"),
    ("overflow", "hidden"),
    ("white-space", "nowrap"),
];

static FRONT_MATTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\A---\n(?P<body>.*?)\n---").expect("valid regex"));
static TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^title:(?P<title>.*)$").expect("valid regex"));

/// Title from a leading front-matter block, if any.
///
/// Only the first block at the very start of the source counts, and only
/// its first `title:` line. A blank title counts as no title.
pub fn parse_title(source: &str) -> Option<&str> {
    let body = FRONT_MATTER.captures(source)?.name("body")?.as_str();
    let title = TITLE.captures(body)?.name("title")?.as_str().trim();
    (!title.is_empty()).then_some(title)
}

/// Summary line shown on the collapsed disclosure.
pub fn summary_text(title: Option<&str>) -> String {
    match title {
        Some(title) => format!("{title} - A {ATTRIBUTION}"),
        None => ATTRIBUTION.to_string(),
    }
}

/// Nodes created for one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder<N> {
    /// The `<details>` element now standing where the block was.
    pub disclosure: N,
    /// Where the surface gets mounted.
    pub mount: N,
}

/// Replace the candidate's element with an open disclosure.
pub fn build_placeholder<H: HostDocument>(
    host: &H,
    block: &CandidateBlock<H::Node>,
) -> Result<Placeholder<H::Node>, PlatformError> {
    let details = host.create_element("details")?;
    let summary = host.create_element("summary")?;
    let summary_line = host.create_element("p")?;
    let mount = host.create_element("div")?;

    let title = parse_title(&block.diagram_source);
    host.set_text(&summary_line, &summary_text(title));
    for (property, value) in SUMMARY_TEXT_STYLE {
        host.set_style(&summary_line, property, value)?;
    }

    host.append_child(&summary, &summary_line)?;
    host.append_child(&details, &summary)?;
    host.append_child(&details, &mount)?;
    host.set_attribute(&details, "open", "")?;
    host.isolate_clicks(&details)?;

    host.replace_with(&block.element_to_replace, &details)?;

    let style = host.create_element("style")?;
    host.set_text(&style, DISCLOSURE_STYLE);
    host.insert_before(&details, &style)?;

    tracing::debug!(title = ?title, "placed diagram disclosure");
    Ok(Placeholder {
        disclosure: details,
        mount,
    })
}

/// Keeps the disclosure open while the diagram measures itself, then
/// restores whatever state the user left it in.
pub struct DisclosureLifecycle<H: HostDocument> {
    host: Rc<H>,
    disclosure: H::Node,
    was_open: Cell<bool>,
}

impl<H: HostDocument> DisclosureLifecycle<H> {
    pub fn new(host: Rc<H>, disclosure: H::Node) -> Self {
        Self {
            host,
            disclosure,
            was_open: Cell::new(true),
        }
    }

    fn set_open(&self, open: bool) {
        let result = if open {
            self.host.set_attribute(&self.disclosure, "open", "")
        } else {
            self.host.remove_attribute(&self.disclosure, "open")
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to toggle disclosure");
        }
    }
}

impl<H: HostDocument> RenderLifecycle for DisclosureLifecycle<H> {
    fn before_render(&self) -> LocalBoxFuture<'static, ()> {
        self.was_open
            .set(self.host.has_attribute(&self.disclosure, "open"));
        self.set_open(true);
        futures::future::ready(()).boxed_local()
    }

    fn after_render(&self) {
        self.set_open(self.was_open.get());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryHost;

    #[test]
    fn test_summary_without_title() {
        assert_eq!(parse_title("A-->B"), None);
        insta::assert_snapshot!(
            summary_text(None),
            @r#"Mermaid Diagram (Powered by the "Mermaid in Jira" Chrome Extension)"#
        );
    }

    #[test]
    fn test_summary_with_front_matter_title() {
        let title = parse_title("---\ntitle: Flow\n---\nA-->B");
        assert_eq!(title, Some("Flow"));
        assert!(summary_text(title).starts_with("Flow - A "));
    }

    #[test]
    fn test_title_edge_cases() {
        // Title without a space after the colon.
        assert_eq!(parse_title("---\ntitle:Flow\n---\nA"), Some("Flow"));
        // Other keys before the title.
        assert_eq!(
            parse_title("---\nconfig: x\ntitle: Deep  \n---\nA"),
            Some("Deep")
        );
        // Blank title.
        assert_eq!(parse_title("---\ntitle:\n---\nA"), None);
        // Front matter not at the start.
        assert_eq!(parse_title("A-->B\n---\ntitle: Late\n---"), None);
        // Unterminated front matter.
        assert_eq!(parse_title("---\ntitle: Open\nA-->B"), None);
        // A title line after the front matter closes is not a title.
        assert_eq!(
            parse_title("---\nconfig: x\n---\ntitle: Body\n---"),
            None
        );
    }

    #[test]
    fn test_build_placeholder_replaces_element() {
        let host = MemoryHost::new();
        let body = host.body();
        let before = host.element("p").under(&body);
        let pre = host.element("pre").text("ignored").under(&body);
        let block = CandidateBlock {
            element_to_replace: pre,
            diagram_source: "---\ntitle: Flow\n---\nA-->B".into(),
        };

        let placeholder = build_placeholder(&host, &block).unwrap();

        let children = host.children(&body);
        assert_eq!(children.len(), 3);
        assert_eq!(children[0], before);
        assert_eq!(host.tag_name(&children[1]), "style");
        assert_eq!(children[2], placeholder.disclosure);
        assert!(!host.is_connected(&pre));

        assert!(host.has_attribute(&placeholder.disclosure, "open"));
        assert!(host.clicks_isolated(&placeholder.disclosure));
        let parts = host.children(&placeholder.disclosure);
        assert_eq!(host.tag_name(&parts[0]), "summary");
        assert_eq!(parts[1], placeholder.mount);
        assert_eq!(
            host.text_content(&parts[0]).as_deref(),
            Some(summary_text(Some("Flow")).as_str())
        );
    }

    #[test]
    fn test_lifecycle_forces_open_then_restores() {
        let host = Rc::new(MemoryHost::new());
        let body = host.body();
        let pre = host.element("pre").under(&body);
        let block = CandidateBlock {
            element_to_replace: pre,
            diagram_source: "A-->B".into(),
        };
        let placeholder = build_placeholder(&*host, &block).unwrap();
        let details = placeholder.disclosure;
        let lifecycle = DisclosureLifecycle::new(host.clone(), details);

        // User collapsed it before the surface got to render.
        host.remove_attribute(&details, "open").unwrap();
        host.block_on(lifecycle.before_render());
        assert!(host.has_attribute(&details, "open"));

        lifecycle.after_render();
        assert!(!host.has_attribute(&details, "open"));
    }

    #[test]
    fn test_lifecycle_state_comes_from_before_render() {
        let host = Rc::new(MemoryHost::new());
        let details = host.element("details").under(&host.body());
        // Closed when the lifecycle is built, opened by the user afterwards.
        let lifecycle = DisclosureLifecycle::new(host.clone(), details);
        host.set_attribute(&details, "open", "").unwrap();

        host.block_on(lifecycle.before_render());
        lifecycle.after_render();
        assert!(host.has_attribute(&details, "open"));

        // Restoring without a preceding hook leaves it open.
        let fresh = DisclosureLifecycle::new(host.clone(), details);
        fresh.after_render();
        assert!(host.has_attribute(&details, "open"));
    }
}
