//! A small CSS selector subset for locating host-page elements.
//!
//! Supports compound selectors (`tag`, `#id`, `.class`), the child
//! combinator `>`, and comma-separated lists. The same parsed selector is
//! rendered back to CSS for `querySelectorAll` in the browser and evaluated
//! directly against the memory tree.

use smol_str::SmolStr;

use crate::platform::HostDocument;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectorError {
    #[error("empty selector")]
    Empty,
    #[error("unsupported character {ch:?} in selector {selector:?}")]
    Unsupported { selector: String, ch: char },
    #[error("dangling combinator in selector {0:?}")]
    DanglingCombinator(String),
}

/// One compound selector: `tag#id.class1.class2`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Compound {
    pub tag: Option<SmolStr>,
    pub id: Option<SmolStr>,
    pub classes: Vec<SmolStr>,
}

impl Compound {
    fn is_empty(&self) -> bool {
        self.tag.is_none() && self.id.is_none() && self.classes.is_empty()
    }

    fn matches<D: HostDocument + ?Sized>(&self, host: &D, node: &D::Node) -> bool {
        if let Some(tag) = &self.tag {
            if !host.tag_name(node).eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if host.element_id(node).as_deref() != Some(id.as_str()) {
                return false;
            }
        }
        self.classes.iter().all(|class| host.has_class(node, class))
    }

    fn to_css(&self) -> String {
        let mut out = String::new();
        if let Some(tag) = &self.tag {
            out.push_str(tag);
        }
        if let Some(id) = &self.id {
            out.push('#');
            out.push_str(id);
        }
        for class in &self.classes {
            out.push('.');
            out.push_str(class);
        }
        out
    }
}

/// A chain of compounds joined by `>`, outermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    chain: Vec<Compound>,
}

impl Selector {
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        let mut chain = Vec::new();
        for part in input.split('>') {
            let part = part.trim();
            if part.is_empty() {
                return Err(if input.trim().is_empty() {
                    SelectorError::Empty
                } else {
                    SelectorError::DanglingCombinator(input.to_string())
                });
            }
            chain.push(parse_compound(part, input)?);
        }
        Ok(Self { chain })
    }

    /// Whether `node` matches, checking each `>` step against its parent.
    pub fn matches<D: HostDocument + ?Sized>(&self, host: &D, node: &D::Node) -> bool {
        let mut current = Some(node.clone());
        for compound in self.chain.iter().rev() {
            let Some(node) = current else {
                return false;
            };
            if !compound.matches(host, &node) {
                return false;
            }
            current = host.parent(&node);
        }
        true
    }

    pub fn to_css(&self) -> String {
        self.chain
            .iter()
            .map(Compound::to_css)
            .collect::<Vec<_>>()
            .join(" > ")
    }
}

fn parse_compound(part: &str, selector: &str) -> Result<Compound, SelectorError> {
    #[derive(Clone, Copy)]
    enum Slot {
        Tag,
        Id,
        Class,
    }

    let mut compound = Compound::default();
    let mut slot = Slot::Tag;
    let mut buf = String::new();

    let flush = |slot: Slot, buf: &mut String, compound: &mut Compound| {
        if buf.is_empty() {
            return;
        }
        let value = SmolStr::new(buf.as_str());
        match slot {
            Slot::Tag => compound.tag = Some(SmolStr::new(value.to_ascii_lowercase())),
            Slot::Id => compound.id = Some(value),
            Slot::Class => compound.classes.push(value),
        }
        buf.clear();
    };

    for ch in part.chars() {
        match ch {
            '#' => {
                flush(slot, &mut buf, &mut compound);
                slot = Slot::Id;
            }
            '.' => {
                flush(slot, &mut buf, &mut compound);
                slot = Slot::Class;
            }
            c if c.is_ascii_alphanumeric() || c == '-' || c == '_' => buf.push(c),
            c => {
                return Err(SelectorError::Unsupported {
                    selector: selector.to_string(),
                    ch: c,
                });
            }
        }
    }
    flush(slot, &mut buf, &mut compound);

    if compound.is_empty() {
        return Err(SelectorError::Empty);
    }
    Ok(compound)
}

/// Comma-separated selectors; a node matches if any selector matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorList {
    selectors: Vec<Selector>,
}

impl SelectorList {
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        let selectors = input
            .split(',')
            .map(Selector::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { selectors })
    }

    pub fn matches<D: HostDocument + ?Sized>(&self, host: &D, node: &D::Node) -> bool {
        self.selectors.iter().any(|s| s.matches(host, node))
    }

    pub fn to_css(&self) -> String {
        self.selectors
            .iter()
            .map(Selector::to_css)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryHost;

    #[test]
    fn test_parse_roundtrips_to_css() {
        let list = SelectorList::parse(
            ".codeContent.panelContent > code,pre , .preformattedContent.panelContent>pre",
        )
        .unwrap();
        insta::assert_snapshot!(
            list.to_css(),
            @".codeContent.panelContent > code, pre, .preformattedContent.panelContent > pre"
        );
    }

    #[test]
    fn test_parse_id_and_tag() {
        let sel = Selector::parse("DIV#description-val.active").unwrap();
        assert_eq!(sel.to_css(), "div#description-val.active");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Selector::parse("  "), Err(SelectorError::Empty));
        assert!(matches!(
            Selector::parse("div >"),
            Err(SelectorError::DanglingCombinator(_))
        ));
        assert!(matches!(
            Selector::parse("div code"),
            Err(SelectorError::Unsupported { ch: ' ', .. })
        ));
        assert!(matches!(
            Selector::parse("a[href]"),
            Err(SelectorError::Unsupported { ch: '[', .. })
        ));
    }

    #[test]
    fn test_child_combinator_matching() {
        let host = MemoryHost::new();
        let body = host.body();
        let panel = host.element("div").class("codeContent").class("panelContent").under(&body);
        let code = host.element("code").under(&panel);
        let loose = host.element("code").under(&body);

        let list = SelectorList::parse(".codeContent.panelContent > code").unwrap();
        assert!(list.matches(&host, &code));
        assert!(!list.matches(&host, &loose));
        assert_eq!(host.query_all(&body, &list), vec![code]);
    }

    #[test]
    fn test_query_all_is_document_order() {
        let host = MemoryHost::new();
        let body = host.body();
        let first = host.element("pre").under(&body);
        let wrapper = host.element("div").under(&body);
        let nested = host.element("code").under(&wrapper);
        let last = host.element("pre").under(&body);

        let list = SelectorList::parse("code, pre").unwrap();
        assert_eq!(host.query_all(&body, &list), vec![first, nested, last]);
        // The root itself is never part of the result.
        assert_eq!(host.query_all(&nested, &list), vec![]);
    }
}
