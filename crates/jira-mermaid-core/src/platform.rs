//! Platform abstraction traits for the pipeline.
//!
//! These traits define the interface between the pipeline logic and the
//! host environment (the browser DOM, or the in-memory tree used in tests).
//! Everything above this module is written once against these traits.

use std::time::Duration;

use futures::future::LocalBoxFuture;

use crate::protocol::CrossContextMessage;
use crate::selector::SelectorList;

/// Error type for platform operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformError(pub String);

impl std::fmt::Display for PlatformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for PlatformError {}

impl From<&str> for PlatformError {
    fn from(s: &str) -> Self {
        PlatformError(s.to_string())
    }
}

impl From<String> for PlatformError {
    fn from(s: String) -> Self {
        PlatformError(s)
    }
}

/// Read and write access to the host page's element tree.
///
/// Nodes are cheap handles (`web_sys::Element` in the browser, an index in
/// the memory tree). All operations act on element nodes only.
pub trait HostDocument {
    type Node: Clone + PartialEq + std::fmt::Debug + 'static;

    /// The document body, root of the initial detection pass.
    fn body(&self) -> Self::Node;

    /// Lowercase tag name.
    fn tag_name(&self, node: &Self::Node) -> String;

    fn element_id(&self, node: &Self::Node) -> Option<String>;

    fn has_class(&self, node: &Self::Node, class: &str) -> bool;

    fn parent(&self, node: &Self::Node) -> Option<Self::Node>;

    /// Element children in document order.
    fn children(&self, node: &Self::Node) -> Vec<Self::Node>;

    /// Concatenated text of the subtree, `None` when the node has none.
    fn text_content(&self, node: &Self::Node) -> Option<String>;

    /// Whether the node is currently attached to the page.
    fn is_connected(&self, node: &Self::Node) -> bool;

    fn create_element(&self, tag: &str) -> Result<Self::Node, PlatformError>;

    fn set_text(&self, node: &Self::Node, text: &str);

    fn set_style(&self, node: &Self::Node, property: &str, value: &str)
    -> Result<(), PlatformError>;

    fn set_attribute(&self, node: &Self::Node, name: &str, value: &str)
    -> Result<(), PlatformError>;

    fn remove_attribute(&self, node: &Self::Node, name: &str) -> Result<(), PlatformError>;

    fn has_attribute(&self, node: &Self::Node, name: &str) -> bool;

    fn append_child(&self, parent: &Self::Node, child: &Self::Node) -> Result<(), PlatformError>;

    /// Replace `old` with `new` in `old`'s parent.
    fn replace_with(&self, old: &Self::Node, new: &Self::Node) -> Result<(), PlatformError>;

    /// Insert `new` as the previous sibling of `reference`.
    fn insert_before(&self, reference: &Self::Node, new: &Self::Node)
    -> Result<(), PlatformError>;

    /// Detach the node from its parent. No-op when already detached.
    fn remove(&self, node: &Self::Node);

    /// Stop click events on this node from reaching host-page handlers
    /// bound to its ancestors.
    fn isolate_clicks(&self, node: &Self::Node) -> Result<(), PlatformError>;

    /// Embedded frames under `root`.
    fn frames(&self, root: &Self::Node) -> Vec<Self::Node>;

    /// Root element of a frame's document.
    ///
    /// `Ok(None)` when the frame has no document yet, `Err` when the host
    /// denies cross-context access.
    fn frame_root(&self, frame: &Self::Node) -> Result<Option<Self::Node>, PlatformError>;

    /// All descendants of `root` (excluding `root`) matching the selector
    /// list, in document order.
    ///
    /// The default walks the tree; platforms with a native query engine
    /// should override this.
    fn query_all(&self, root: &Self::Node, selectors: &SelectorList) -> Vec<Self::Node> {
        let mut found = Vec::new();
        let mut stack: Vec<Self::Node> = self.children(root).into_iter().rev().collect();
        while let Some(node) = stack.pop() {
            if selectors.matches(self, &node) {
                found.push(node.clone());
            }
            stack.extend(self.children(&node).into_iter().rev());
        }
        found
    }

    /// First descendant of `root` matching the selector list.
    fn query_first(&self, root: &Self::Node, selectors: &SelectorList) -> Option<Self::Node> {
        self.query_all(root, selectors).into_iter().next()
    }

    /// Number of element children.
    fn child_element_count(&self, node: &Self::Node) -> usize {
        self.children(node).len()
    }
}

/// An isolated rendering context the host can talk to.
pub trait RenderSurface {
    /// Post a message into the surface's own context.
    fn post_message(&self, message: &CrossContextMessage) -> Result<(), PlatformError>;

    /// Whether the surface is still attached to the host page.
    fn is_attached(&self) -> bool;
}

/// A surface that has been created but not attached yet.
///
/// `loaded` resolves once the surface has finished loading its document;
/// it resolves to `Err` if the surface is dropped before that.
pub struct PendingSurface<S> {
    pub surface: S,
    pub loaded: LocalBoxFuture<'static, Result<(), PlatformError>>,
}

/// Host capabilities beyond the element tree: isolated surfaces, modals,
/// asset access, mutation observation, timers, and task spawning.
pub trait SandboxHost: HostDocument {
    type Surface: RenderSurface + Clone + 'static;
    /// Handle for a live mutation subscription.
    type Observer: 'static;

    /// Create a surface whose document is `srcdoc`.
    ///
    /// The surface must not start loading until it is attached.
    fn create_surface(
        &self,
        srcdoc: &str,
        full_screen: bool,
    ) -> Result<PendingSurface<Self::Surface>, PlatformError>;

    /// Append the surface to `mount`, which starts loading it.
    fn attach_surface(&self, mount: &Self::Node, surface: &Self::Surface)
    -> Result<(), PlatformError>;

    /// Stretch the surface's inner document to fill the surface.
    fn fill_surface(&self, surface: &Self::Surface) -> Result<(), PlatformError>;

    /// Call `on_click` whenever the `#fullscreen` control inside the surface
    /// is clicked.
    fn bind_fullscreen_trigger(
        &self,
        surface: &Self::Surface,
        on_click: Box<dyn Fn()>,
    ) -> Result<(), PlatformError>;

    /// Open a previously appended overlay element as a modal.
    fn show_modal(&self, overlay: &Self::Node) -> Result<(), PlatformError>;

    /// Read a packaged extension asset as text.
    fn fetch_asset(&self, path: &str) -> LocalBoxFuture<'static, Result<String, PlatformError>>;

    /// Call `on_added` with the element nodes added anywhere under
    /// `target`, one batch per mutation record set.
    fn observe_added(
        &self,
        target: &Self::Node,
        on_added: Box<dyn Fn(Vec<Self::Node>)>,
    ) -> Result<Self::Observer, PlatformError>;

    /// Stop a subscription. Disconnecting twice is a no-op.
    fn disconnect(&self, observer: &Self::Observer);

    /// Resolves after `duration` has elapsed.
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()>;

    /// Run a future to completion on the host's event loop.
    fn spawn(&self, task: LocalBoxFuture<'static, ()>);
}
