//! In-memory host platform.
//!
//! A minimal element tree plus scripted surfaces, implementing
//! `HostDocument` and `SandboxHost` without a browser. Spawned tasks run on
//! an owned `LocalPool`, so callers drive the event loop explicitly with
//! [`MemoryHost::run_until_stalled`] or [`MemoryHost::block_on`].

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use futures::channel::oneshot;
use futures::executor::{LocalPool, LocalSpawner};
use futures::future::LocalBoxFuture;
use futures::task::LocalSpawnExt;
use futures::FutureExt;

use crate::platform::{
    HostDocument, PendingSurface, PlatformError, RenderSurface, SandboxHost,
};
use crate::protocol::CrossContextMessage;

/// Handle to a node in the memory tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemNode(usize);

#[derive(Debug, Default)]
enum FrameDoc {
    #[default]
    NotAFrame,
    Denied,
    Root(MemNode),
}

#[derive(Debug, Default)]
struct NodeData {
    tag: String,
    id: Option<String>,
    classes: Vec<String>,
    attributes: BTreeMap<String, String>,
    styles: BTreeMap<String, String>,
    text: Option<String>,
    parent: Option<MemNode>,
    children: Vec<MemNode>,
    clicks_isolated: bool,
    frame: FrameDoc,
}

#[derive(Debug, Default)]
struct Tree {
    nodes: Vec<NodeData>,
}

impl Tree {
    fn add(&mut self, tag: &str) -> MemNode {
        self.nodes.push(NodeData {
            tag: tag.to_ascii_lowercase(),
            ..Default::default()
        });
        MemNode(self.nodes.len() - 1)
    }

    fn get(&self, node: MemNode) -> &NodeData {
        &self.nodes[node.0]
    }

    fn get_mut(&mut self, node: MemNode) -> &mut NodeData {
        &mut self.nodes[node.0]
    }

    fn detach(&mut self, node: MemNode) {
        if let Some(parent) = self.get_mut(node).parent.take() {
            self.get_mut(parent).children.retain(|c| *c != node);
        }
    }

    fn text(&self, node: MemNode, out: &mut String) {
        let data = self.get(node);
        if let Some(text) = &data.text {
            out.push_str(text);
        }
        for child in &data.children {
            self.text(*child, out);
        }
    }

    /// Whether `node` is `ancestor` or lies beneath it.
    fn within(&self, node: MemNode, ancestor: MemNode) -> bool {
        let mut current = Some(node);
        while let Some(n) = current {
            if n == ancestor {
                return true;
            }
            current = self.get(n).parent;
        }
        false
    }

    fn collect_frames(&self, node: MemNode, out: &mut Vec<MemNode>) {
        for child in &self.get(node).children {
            if !matches!(self.get(*child).frame, FrameDoc::NotAFrame) {
                out.push(*child);
            }
            self.collect_frames(*child, out);
        }
    }
}

/// Builder returned by [`MemoryHost::element`].
pub struct ElementBuilder<'a> {
    host: &'a MemoryHost,
    node: MemNode,
}

impl ElementBuilder<'_> {
    pub fn id(self, id: &str) -> Self {
        self.host.tree.borrow_mut().get_mut(self.node).id = Some(id.to_string());
        self
    }

    pub fn class(self, class: &str) -> Self {
        self.host.add_class(&self.node, class);
        self
    }

    pub fn text(self, text: &str) -> Self {
        self.host.tree.borrow_mut().get_mut(self.node).text = Some(text.to_string());
        self
    }

    /// Append to `parent` and return the node.
    pub fn under(self, parent: &MemNode) -> MemNode {
        let mut tree = self.host.tree.borrow_mut();
        tree.get_mut(self.node).parent = Some(*parent);
        tree.get_mut(*parent).children.push(self.node);
        self.node
    }

    /// Return the node without attaching it anywhere.
    pub fn detached(self) -> MemNode {
        self.node
    }
}

struct SurfaceState {
    frame: MemNode,
    srcdoc: String,
    full_screen: bool,
    tree: Rc<RefCell<Tree>>,
    load: RefCell<Option<oneshot::Sender<()>>>,
    posted: RefCell<Vec<CrossContextMessage>>,
    filled: Cell<bool>,
    trigger: RefCell<Option<Box<dyn Fn()>>>,
}

/// A scripted isolated surface.
#[derive(Clone)]
pub struct MemorySurface {
    state: Rc<SurfaceState>,
}

impl std::fmt::Debug for MemorySurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySurface")
            .field("frame", &self.state.frame)
            .field("full_screen", &self.state.full_screen)
            .finish_non_exhaustive()
    }
}

impl MemorySurface {
    pub fn frame(&self) -> MemNode {
        self.state.frame
    }

    pub fn srcdoc(&self) -> &str {
        &self.state.srcdoc
    }

    pub fn is_full_screen(&self) -> bool {
        self.state.full_screen
    }

    /// Fire the load event. Returns false if it already fired.
    pub fn finish_load(&self) -> bool {
        match self.state.load.borrow_mut().take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Messages the host posted into this surface, oldest first.
    pub fn posted(&self) -> Vec<CrossContextMessage> {
        self.state.posted.borrow().clone()
    }

    pub fn is_filled(&self) -> bool {
        self.state.filled.get()
    }

    /// Simulate a click on the surface's `#fullscreen` control.
    pub fn click_fullscreen(&self) {
        if let Some(on_click) = self.state.trigger.borrow().as_ref() {
            on_click();
        }
    }
}

impl RenderSurface for MemorySurface {
    fn post_message(&self, message: &CrossContextMessage) -> Result<(), PlatformError> {
        self.state.posted.borrow_mut().push(message.clone());
        Ok(())
    }

    fn is_attached(&self) -> bool {
        connected(&self.state.tree.borrow(), self.state.frame)
    }
}

fn connected(tree: &Tree, node: MemNode) -> bool {
    let mut current = Some(node);
    while let Some(n) = current {
        if n == MemoryHost::BODY {
            return true;
        }
        current = tree.get(n).parent;
    }
    false
}

/// A mutation subscription, delivered to by [`MemoryHost::notify_added`].
pub struct MemObserver {
    target: MemNode,
    active: Cell<bool>,
    on_added: Box<dyn Fn(Vec<MemNode>)>,
}

impl MemObserver {
    pub fn target(&self) -> MemNode {
        self.target
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }
}

/// In-memory implementation of the host platform.
pub struct MemoryHost {
    tree: Rc<RefCell<Tree>>,
    surfaces: RefCell<Vec<MemorySurface>>,
    observers: RefCell<Vec<Rc<MemObserver>>>,
    timers: RefCell<Vec<(Duration, oneshot::Sender<()>)>>,
    assets: RefCell<HashMap<String, Result<String, PlatformError>>>,
    asset_fetches: Cell<usize>,
    auto_load: Cell<bool>,
    pool: RefCell<LocalPool>,
    spawner: LocalSpawner,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    const BODY: MemNode = MemNode(0);

    pub fn new() -> Self {
        let mut tree = Tree::default();
        tree.add("body");
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        Self {
            tree: Rc::new(RefCell::new(tree)),
            surfaces: RefCell::new(Vec::new()),
            observers: RefCell::new(Vec::new()),
            timers: RefCell::new(Vec::new()),
            assets: RefCell::new(HashMap::new()),
            asset_fetches: Cell::new(0),
            auto_load: Cell::new(true),
            pool: RefCell::new(pool),
            spawner,
        }
    }

    /// Start building a new element.
    pub fn element(&self, tag: &str) -> ElementBuilder<'_> {
        let node = self.tree.borrow_mut().add(tag);
        ElementBuilder { host: self, node }
    }

    /// Append a frame to `parent` whose document root is returned.
    pub fn frame_with_document(&self, parent: &MemNode) -> (MemNode, MemNode) {
        let frame = self.element("iframe").under(parent);
        let root = self.element("html").detached();
        self.tree.borrow_mut().get_mut(frame).frame = FrameDoc::Root(root);
        (frame, root)
    }

    /// Append a frame whose document the host refuses to expose.
    pub fn denied_frame(&self, parent: &MemNode) -> MemNode {
        let frame = self.element("iframe").under(parent);
        self.tree.borrow_mut().get_mut(frame).frame = FrameDoc::Denied;
        frame
    }

    pub fn add_class(&self, node: &MemNode, class: &str) {
        let mut tree = self.tree.borrow_mut();
        let classes = &mut tree.get_mut(*node).classes;
        if !classes.iter().any(|c| c == class) {
            classes.push(class.to_string());
        }
    }

    pub fn remove_class(&self, node: &MemNode, class: &str) {
        self.tree
            .borrow_mut()
            .get_mut(*node)
            .classes
            .retain(|c| c != class);
    }

    pub fn style(&self, node: &MemNode, property: &str) -> Option<String> {
        self.tree.borrow().get(*node).styles.get(property).cloned()
    }

    pub fn attribute(&self, node: &MemNode, name: &str) -> Option<String> {
        self.tree.borrow().get(*node).attributes.get(name).cloned()
    }

    pub fn clicks_isolated(&self, node: &MemNode) -> bool {
        self.tree.borrow().get(*node).clicks_isolated
    }

    /// Own text of the node, ignoring descendants.
    pub fn own_text(&self, node: &MemNode) -> Option<String> {
        self.tree.borrow().get(*node).text.clone()
    }

    pub fn set_asset(&self, path: &str, contents: &str) {
        self.assets
            .borrow_mut()
            .insert(path.to_string(), Ok(contents.to_string()));
    }

    pub fn fail_asset(&self, path: &str, reason: &str) {
        self.assets
            .borrow_mut()
            .insert(path.to_string(), Err(PlatformError::from(reason)));
    }

    /// Number of `fetch_asset` calls so far.
    pub fn asset_fetches(&self) -> usize {
        self.asset_fetches.get()
    }

    /// When disabled, surfaces only load on [`MemorySurface::finish_load`].
    pub fn set_auto_load(&self, enabled: bool) {
        self.auto_load.set(enabled);
    }

    /// Every surface created so far, in creation order.
    pub fn surfaces(&self) -> Vec<MemorySurface> {
        self.surfaces.borrow().clone()
    }

    /// Deliver one mutation batch to every active observer whose target
    /// contains the parent of an added node.
    pub fn notify_added(&self, added: &[MemNode]) {
        let observers: Vec<_> = self.observers.borrow().clone();
        for observer in observers {
            // An earlier callback in this batch may have disconnected it.
            if !observer.is_active() {
                continue;
            }
            let inside: Vec<MemNode> = {
                let tree = self.tree.borrow();
                added
                    .iter()
                    .copied()
                    .filter(|node| {
                        tree.get(*node)
                            .parent
                            .is_some_and(|parent| tree.within(parent, observer.target))
                    })
                    .collect()
            };
            if !inside.is_empty() {
                (observer.on_added)(inside);
            }
        }
    }

    pub fn active_observers(&self) -> Vec<Rc<MemObserver>> {
        self.observers
            .borrow()
            .iter()
            .filter(|o| o.is_active())
            .cloned()
            .collect()
    }

    /// Durations of timers that have not fired yet.
    pub fn pending_timers(&self) -> Vec<Duration> {
        self.timers.borrow().iter().map(|(d, _)| *d).collect()
    }

    /// Fire every pending timer. Returns how many fired.
    pub fn fire_timers(&self) -> usize {
        let timers = std::mem::take(&mut *self.timers.borrow_mut());
        let fired = timers.len();
        for (_, tx) in timers {
            let _ = tx.send(());
        }
        fired
    }

    pub fn run_until_stalled(&self) {
        self.pool.borrow_mut().run_until_stalled();
    }

    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.pool.borrow_mut().run_until(future)
    }
}

impl HostDocument for MemoryHost {
    type Node = MemNode;

    fn body(&self) -> MemNode {
        Self::BODY
    }

    fn tag_name(&self, node: &MemNode) -> String {
        self.tree.borrow().get(*node).tag.clone()
    }

    fn element_id(&self, node: &MemNode) -> Option<String> {
        self.tree.borrow().get(*node).id.clone()
    }

    fn has_class(&self, node: &MemNode, class: &str) -> bool {
        self.tree.borrow().get(*node).classes.iter().any(|c| c == class)
    }

    fn parent(&self, node: &MemNode) -> Option<MemNode> {
        self.tree.borrow().get(*node).parent
    }

    fn children(&self, node: &MemNode) -> Vec<MemNode> {
        self.tree.borrow().get(*node).children.clone()
    }

    fn text_content(&self, node: &MemNode) -> Option<String> {
        let mut out = String::new();
        self.tree.borrow().text(*node, &mut out);
        (!out.is_empty()).then_some(out)
    }

    fn is_connected(&self, node: &MemNode) -> bool {
        connected(&self.tree.borrow(), *node)
    }

    fn create_element(&self, tag: &str) -> Result<MemNode, PlatformError> {
        Ok(self.tree.borrow_mut().add(tag))
    }

    fn set_text(&self, node: &MemNode, text: &str) {
        let mut tree = self.tree.borrow_mut();
        for child in tree.get(*node).children.clone() {
            tree.detach(child);
        }
        tree.get_mut(*node).text = Some(text.to_string());
    }

    fn set_style(&self, node: &MemNode, property: &str, value: &str) -> Result<(), PlatformError> {
        self.tree
            .borrow_mut()
            .get_mut(*node)
            .styles
            .insert(property.to_string(), value.to_string());
        Ok(())
    }

    fn set_attribute(&self, node: &MemNode, name: &str, value: &str) -> Result<(), PlatformError> {
        self.tree
            .borrow_mut()
            .get_mut(*node)
            .attributes
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn remove_attribute(&self, node: &MemNode, name: &str) -> Result<(), PlatformError> {
        self.tree.borrow_mut().get_mut(*node).attributes.remove(name);
        Ok(())
    }

    fn has_attribute(&self, node: &MemNode, name: &str) -> bool {
        self.tree.borrow().get(*node).attributes.contains_key(name)
    }

    fn append_child(&self, parent: &MemNode, child: &MemNode) -> Result<(), PlatformError> {
        let mut tree = self.tree.borrow_mut();
        tree.detach(*child);
        tree.get_mut(*child).parent = Some(*parent);
        tree.get_mut(*parent).children.push(*child);
        Ok(())
    }

    fn replace_with(&self, old: &MemNode, new: &MemNode) -> Result<(), PlatformError> {
        let mut tree = self.tree.borrow_mut();
        let parent = tree
            .get(*old)
            .parent
            .ok_or_else(|| PlatformError::from("cannot replace a detached node"))?;
        tree.detach(*new);
        let siblings = &mut tree.get_mut(parent).children;
        let index = siblings
            .iter()
            .position(|c| c == old)
            .ok_or_else(|| PlatformError::from("node missing from its parent"))?;
        siblings[index] = *new;
        tree.get_mut(*new).parent = Some(parent);
        tree.get_mut(*old).parent = None;
        Ok(())
    }

    fn insert_before(&self, reference: &MemNode, new: &MemNode) -> Result<(), PlatformError> {
        let mut tree = self.tree.borrow_mut();
        let parent = tree
            .get(*reference)
            .parent
            .ok_or_else(|| PlatformError::from("cannot insert next to a detached node"))?;
        tree.detach(*new);
        let siblings = &mut tree.get_mut(parent).children;
        let index = siblings
            .iter()
            .position(|c| c == reference)
            .ok_or_else(|| PlatformError::from("node missing from its parent"))?;
        siblings.insert(index, *new);
        tree.get_mut(*new).parent = Some(parent);
        Ok(())
    }

    fn remove(&self, node: &MemNode) {
        self.tree.borrow_mut().detach(*node);
    }

    fn isolate_clicks(&self, node: &MemNode) -> Result<(), PlatformError> {
        self.tree.borrow_mut().get_mut(*node).clicks_isolated = true;
        Ok(())
    }

    fn frames(&self, root: &MemNode) -> Vec<MemNode> {
        let mut out = Vec::new();
        self.tree.borrow().collect_frames(*root, &mut out);
        out
    }

    fn frame_root(&self, frame: &MemNode) -> Result<Option<MemNode>, PlatformError> {
        match self.tree.borrow().get(*frame).frame {
            FrameDoc::NotAFrame => Ok(None),
            FrameDoc::Denied => Err(PlatformError::from(
                "Blocked a frame from accessing a cross-origin frame",
            )),
            FrameDoc::Root(root) => Ok(Some(root)),
        }
    }
}

impl SandboxHost for MemoryHost {
    type Surface = MemorySurface;
    type Observer = Rc<MemObserver>;

    fn create_surface(
        &self,
        srcdoc: &str,
        full_screen: bool,
    ) -> Result<PendingSurface<MemorySurface>, PlatformError> {
        let frame = self.create_element("iframe")?;
        self.set_attribute(&frame, "srcdoc", srcdoc)?;
        let (tx, rx) = oneshot::channel();
        let surface = MemorySurface {
            state: Rc::new(SurfaceState {
                frame,
                srcdoc: srcdoc.to_string(),
                full_screen,
                tree: self.tree.clone(),
                load: RefCell::new(Some(tx)),
                posted: RefCell::new(Vec::new()),
                filled: Cell::new(false),
                trigger: RefCell::new(None),
            }),
        };
        self.surfaces.borrow_mut().push(surface.clone());
        let loaded = rx
            .map(|res| res.map_err(|_| PlatformError::from("surface dropped before loading")))
            .boxed_local();
        Ok(PendingSurface { surface, loaded })
    }

    fn attach_surface(&self, mount: &MemNode, surface: &MemorySurface) -> Result<(), PlatformError> {
        self.append_child(mount, &surface.frame())?;
        if self.auto_load.get() {
            surface.finish_load();
        }
        Ok(())
    }

    fn fill_surface(&self, surface: &MemorySurface) -> Result<(), PlatformError> {
        surface.state.filled.set(true);
        Ok(())
    }

    fn bind_fullscreen_trigger(
        &self,
        surface: &MemorySurface,
        on_click: Box<dyn Fn()>,
    ) -> Result<(), PlatformError> {
        *surface.state.trigger.borrow_mut() = Some(on_click);
        Ok(())
    }

    fn show_modal(&self, overlay: &MemNode) -> Result<(), PlatformError> {
        if !self.is_connected(overlay) {
            return Err(PlatformError::from("modal is not attached"));
        }
        self.set_attribute(overlay, "open", "")
    }

    fn fetch_asset(&self, path: &str) -> LocalBoxFuture<'static, Result<String, PlatformError>> {
        self.asset_fetches.set(self.asset_fetches.get() + 1);
        let result = self
            .assets
            .borrow()
            .get(path)
            .cloned()
            .unwrap_or_else(|| Err(PlatformError(format!("no such asset: {path}"))));
        futures::future::ready(result).boxed_local()
    }

    fn observe_added(
        &self,
        target: &MemNode,
        on_added: Box<dyn Fn(Vec<MemNode>)>,
    ) -> Result<Rc<MemObserver>, PlatformError> {
        let observer = Rc::new(MemObserver {
            target: *target,
            active: Cell::new(true),
            on_added,
        });
        self.observers.borrow_mut().push(observer.clone());
        Ok(observer)
    }

    fn disconnect(&self, observer: &Rc<MemObserver>) {
        observer.active.set(false);
    }

    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        let (tx, rx) = oneshot::channel();
        self.timers.borrow_mut().push((duration, tx));
        rx.map(|_| ()).boxed_local()
    }

    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        if let Err(e) = self.spawner.spawn_local(task) {
            tracing::error!(error = %e, "failed to spawn task");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_and_insert_keep_order() {
        let host = MemoryHost::new();
        let body = host.body();
        let a = host.element("p").under(&body);
        let b = host.element("pre").under(&body);
        let c = host.element("p").under(&body);

        let details = host.create_element("details").unwrap();
        host.replace_with(&b, &details).unwrap();
        let style = host.create_element("style").unwrap();
        host.insert_before(&details, &style).unwrap();

        assert_eq!(host.children(&body), vec![a, style, details, c]);
        assert!(!host.is_connected(&b));
        assert_eq!(host.parent(&b), None);
    }

    #[test]
    fn test_text_content_concatenates() {
        let host = MemoryHost::new();
        let body = host.body();
        let pre = host.element("pre").text("a").under(&body);
        host.element("span").text("b").under(&pre);
        assert_eq!(host.text_content(&pre).as_deref(), Some("ab"));

        let empty = host.element("code").under(&body);
        assert_eq!(host.text_content(&empty), None);
    }

    #[test]
    fn test_surface_loads_on_attach() {
        let host = MemoryHost::new();
        let body = host.body();
        let pending = host.create_surface("<html></html>", false).unwrap();
        assert!(!pending.surface.is_attached());

        host.attach_surface(&body, &pending.surface).unwrap();
        assert!(pending.surface.is_attached());
        assert_eq!(host.block_on(pending.loaded), Ok(()));
    }

    #[test]
    fn test_notify_reaches_observers_of_ancestors_only() {
        let host = MemoryHost::new();
        let body = host.body();
        let inside = host.element("div").under(&body);
        let outside = host.element("div").under(&body);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let observer = host
            .observe_added(&inside, Box::new(move |added| sink.borrow_mut().extend(added)))
            .unwrap();

        let a = host.element("pre").under(&inside);
        let b = host.element("pre").under(&outside);
        host.notify_added(&[a, b]);
        assert_eq!(*seen.borrow(), vec![a]);

        host.disconnect(&observer);
        host.notify_added(&[a]);
        assert_eq!(seen.borrow().len(), 1);
        assert!(host.active_observers().is_empty());
    }

    #[test]
    fn test_sleep_resolves_when_timers_fire() {
        let host = MemoryHost::new();
        let done = Rc::new(Cell::new(false));
        let flag = done.clone();
        let sleep = host.sleep(Duration::from_secs(10));
        host.spawn(
            async move {
                sleep.await;
                flag.set(true);
            }
            .boxed_local(),
        );
        host.run_until_stalled();
        assert_eq!(host.pending_timers(), vec![Duration::from_secs(10)]);
        assert!(!done.get());

        assert_eq!(host.fire_timers(), 1);
        host.run_until_stalled();
        assert!(done.get());
    }
}
