//! `HostDocument` and `SandboxHost` over the live page.

use std::time::Duration;

use futures::channel::oneshot;
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use gloo_events::EventListener;
use jira_mermaid_core::{
    CrossContextMessage, HostDocument, PendingSurface, PlatformError, RenderSurface, SandboxHost,
    SelectorList,
};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{
    Document, Element, HtmlCollection, HtmlDialogElement, HtmlElement, HtmlIFrameElement,
    MutationObserver, MutationObserverInit, MutationRecord, Response, Window,
};

#[wasm_bindgen]
extern "C" {
    /// `chrome.runtime.getURL`: absolute URL of a packaged extension file.
    #[wasm_bindgen(js_namespace = ["chrome", "runtime"], js_name = getURL, catch)]
    fn runtime_get_url(path: &str) -> Result<String, JsValue>;
}

/// Wrap a JS exception with what we were doing when it was thrown.
pub(crate) fn js_error(context: &str, value: JsValue) -> PlatformError {
    match value.dyn_ref::<js_sys::Error>() {
        Some(error) => PlatformError(format!("{context}: {}", String::from(error.message()))),
        None => PlatformError(format!("{context}: {value:?}")),
    }
}

fn collection(items: HtmlCollection) -> Vec<Element> {
    (0..items.length()).filter_map(|i| items.item(i)).collect()
}

fn html_element(node: &Element) -> Result<&HtmlElement, PlatformError> {
    node.dyn_ref::<HtmlElement>()
        .ok_or_else(|| PlatformError(format!("<{}> is not an HTML element", node.tag_name())))
}

/// The page the content script runs in.
pub struct BrowserHost {
    window: Window,
    document: Document,
    body: Element,
}

impl BrowserHost {
    pub fn new() -> Result<Self, PlatformError> {
        let window = web_sys::window().ok_or("no window")?;
        let document = window.document().ok_or("no document")?;
        let body = document.body().ok_or("document has no body")?;
        Ok(Self {
            window,
            document,
            body: body.into(),
        })
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn document(&self) -> &Document {
        &self.document
    }
}

impl HostDocument for BrowserHost {
    type Node = Element;

    fn body(&self) -> Element {
        self.body.clone()
    }

    fn tag_name(&self, node: &Element) -> String {
        node.tag_name().to_ascii_lowercase()
    }

    fn element_id(&self, node: &Element) -> Option<String> {
        let id = node.id();
        (!id.is_empty()).then_some(id)
    }

    fn has_class(&self, node: &Element, class: &str) -> bool {
        node.class_list().contains(class)
    }

    fn parent(&self, node: &Element) -> Option<Element> {
        node.parent_element()
    }

    fn children(&self, node: &Element) -> Vec<Element> {
        collection(node.children())
    }

    fn text_content(&self, node: &Element) -> Option<String> {
        node.text_content()
    }

    fn is_connected(&self, node: &Element) -> bool {
        node.is_connected()
    }

    fn create_element(&self, tag: &str) -> Result<Element, PlatformError> {
        self.document
            .create_element(tag)
            .map_err(|e| js_error("createElement", e))
    }

    fn set_text(&self, node: &Element, text: &str) {
        node.set_text_content(Some(text));
    }

    fn set_style(&self, node: &Element, property: &str, value: &str) -> Result<(), PlatformError> {
        html_element(node)?
            .style()
            .set_property(property, value)
            .map_err(|e| js_error("style.setProperty", e))
    }

    fn set_attribute(&self, node: &Element, name: &str, value: &str) -> Result<(), PlatformError> {
        node.set_attribute(name, value)
            .map_err(|e| js_error("setAttribute", e))
    }

    fn remove_attribute(&self, node: &Element, name: &str) -> Result<(), PlatformError> {
        node.remove_attribute(name)
            .map_err(|e| js_error("removeAttribute", e))
    }

    fn has_attribute(&self, node: &Element, name: &str) -> bool {
        node.has_attribute(name)
    }

    fn append_child(&self, parent: &Element, child: &Element) -> Result<(), PlatformError> {
        parent
            .append_child(child)
            .map(|_| ())
            .map_err(|e| js_error("appendChild", e))
    }

    fn replace_with(&self, old: &Element, new: &Element) -> Result<(), PlatformError> {
        old.replace_with_with_node_1(new)
            .map_err(|e| js_error("replaceWith", e))
    }

    fn insert_before(&self, reference: &Element, new: &Element) -> Result<(), PlatformError> {
        reference
            .before_with_node_1(new)
            .map_err(|e| js_error("before", e))
    }

    fn remove(&self, node: &Element) {
        node.remove();
    }

    fn isolate_clicks(&self, node: &Element) -> Result<(), PlatformError> {
        // Jira opens the issue editor on clicks that reach the description.
        EventListener::new(node, "click", |event| event.stop_propagation()).forget();
        Ok(())
    }

    fn frames(&self, root: &Element) -> Vec<Element> {
        collection(root.get_elements_by_tag_name("iframe"))
    }

    fn frame_root(&self, frame: &Element) -> Result<Option<Element>, PlatformError> {
        let Some(frame) = frame.dyn_ref::<HtmlIFrameElement>() else {
            return Ok(None);
        };
        if frame.content_window().is_none() {
            return Ok(None);
        }
        let document = frame
            .content_document()
            .ok_or("Blocked a frame from accessing a cross-origin frame")?;
        Ok(document.document_element())
    }

    fn query_all(&self, root: &Element, selectors: &SelectorList) -> Vec<Element> {
        let css = selectors.to_css();
        match root.query_selector_all(&css) {
            Ok(nodes) => (0..nodes.length())
                .filter_map(|i| nodes.item(i))
                .filter_map(|node| node.dyn_into::<Element>().ok())
                .collect(),
            Err(e) => {
                tracing::error!(selector = %css, error = %js_error("querySelectorAll", e), "query failed");
                Vec::new()
            }
        }
    }
}

/// An `<iframe srcdoc>` rendering surface.
#[derive(Debug, Clone, PartialEq)]
pub struct BrowserSurface {
    frame: HtmlIFrameElement,
}

impl BrowserSurface {
    pub fn frame(&self) -> &HtmlIFrameElement {
        &self.frame
    }

    fn content_document(&self) -> Result<Document, PlatformError> {
        self.frame
            .content_document()
            .ok_or_else(|| PlatformError::from("surface document is not accessible"))
    }
}

impl RenderSurface for BrowserSurface {
    fn post_message(&self, message: &CrossContextMessage) -> Result<(), PlatformError> {
        let window = self
            .frame
            .content_window()
            .ok_or("surface has no window")?;
        let value = serde::Serialize::serialize(
            message,
            &serde_wasm_bindgen::Serializer::json_compatible(),
        )
        .map_err(|e| PlatformError(format!("failed to serialize message: {e}")))?;
        window
            .post_message(&value, "*")
            .map_err(|e| js_error("postMessage", e))
    }

    fn is_attached(&self) -> bool {
        self.frame.is_connected()
    }
}

/// A live `MutationObserver` and the callback it calls into.
pub struct BrowserObserver {
    observer: MutationObserver,
    _callback: Closure<dyn FnMut(js_sys::Array, MutationObserver)>,
}

impl SandboxHost for BrowserHost {
    type Surface = BrowserSurface;
    type Observer = BrowserObserver;

    fn create_surface(
        &self,
        srcdoc: &str,
        _full_screen: bool,
    ) -> Result<PendingSurface<BrowserSurface>, PlatformError> {
        let frame: HtmlIFrameElement = self
            .create_element("iframe")?
            .dyn_into()
            .map_err(|_| PlatformError::from("created iframe is not an HTMLIFrameElement"))?;
        frame.set_srcdoc(srcdoc);
        for (property, value) in [("border", "none"), ("width", "100%"), ("height", "100%")] {
            self.set_style(&frame, property, value)?;
        }

        let (tx, rx) = oneshot::channel();
        EventListener::once(&frame, "load", move |_| {
            let _ = tx.send(());
        })
        .forget();

        let loaded = rx
            .map(|res| res.map_err(|_| PlatformError::from("surface dropped before loading")))
            .boxed_local();
        Ok(PendingSurface {
            surface: BrowserSurface { frame },
            loaded,
        })
    }

    fn attach_surface(&self, mount: &Element, surface: &BrowserSurface) -> Result<(), PlatformError> {
        self.append_child(mount, &surface.frame)
    }

    fn fill_surface(&self, surface: &BrowserSurface) -> Result<(), PlatformError> {
        let root = surface
            .content_document()?
            .document_element()
            .ok_or("surface document has no root element")?;
        for (property, value) in [("width", "100%"), ("height", "100%")] {
            self.set_style(&root, property, value)?;
        }
        Ok(())
    }

    fn bind_fullscreen_trigger(
        &self,
        surface: &BrowserSurface,
        on_click: Box<dyn Fn()>,
    ) -> Result<(), PlatformError> {
        let control = surface
            .content_document()?
            .get_element_by_id("fullscreen")
            .ok_or("surface template has no #fullscreen control")?;
        EventListener::new(&control, "click", move |_| on_click()).forget();
        Ok(())
    }

    fn show_modal(&self, overlay: &Element) -> Result<(), PlatformError> {
        overlay
            .dyn_ref::<HtmlDialogElement>()
            .ok_or("overlay is not a <dialog>")?
            .show_modal()
            .map_err(|e| js_error("showModal", e))
    }

    fn fetch_asset(&self, path: &str) -> LocalBoxFuture<'static, Result<String, PlatformError>> {
        let window = self.window.clone();
        let path = path.to_string();
        async move {
            let url = runtime_get_url(&path).map_err(|e| js_error("chrome.runtime.getURL", e))?;
            let response: Response = JsFuture::from(window.fetch_with_str(&url))
                .await
                .map_err(|e| js_error("fetch", e))?
                .dyn_into()
                .map_err(|_| PlatformError::from("fetch did not return a Response"))?;
            if !response.ok() {
                return Err(PlatformError(format!(
                    "fetching {url} failed with status {}",
                    response.status()
                )));
            }
            let text = response.text().map_err(|e| js_error("Response.text", e))?;
            JsFuture::from(text)
                .await
                .map_err(|e| js_error("Response.text", e))?
                .as_string()
                .ok_or_else(|| PlatformError::from("response body is not text"))
        }
        .boxed_local()
    }

    fn observe_added(
        &self,
        target: &Element,
        on_added: Box<dyn Fn(Vec<Element>)>,
    ) -> Result<BrowserObserver, PlatformError> {
        let callback = Closure::<dyn FnMut(js_sys::Array, MutationObserver)>::new(
            move |records: js_sys::Array, _: MutationObserver| {
                let mut added = Vec::new();
                for record in records.iter() {
                    let record: MutationRecord = record.unchecked_into();
                    let nodes = record.added_nodes();
                    added.extend(
                        (0..nodes.length())
                            .filter_map(|i| nodes.item(i))
                            .filter_map(|node| node.dyn_into::<Element>().ok()),
                    );
                }
                if !added.is_empty() {
                    on_added(added);
                }
            },
        );
        let observer = MutationObserver::new(callback.as_ref().unchecked_ref())
            .map_err(|e| js_error("MutationObserver", e))?;

        let init = MutationObserverInit::new();
        init.set_child_list(true);
        init.set_subtree(true);
        observer
            .observe_with_options(target, &init)
            .map_err(|e| js_error("MutationObserver.observe", e))?;

        Ok(BrowserObserver {
            observer,
            _callback: callback,
        })
    }

    fn disconnect(&self, observer: &BrowserObserver) {
        observer.observer.disconnect();
    }

    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        gloo_timers::future::sleep(duration).boxed_local()
    }

    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        wasm_bindgen_futures::spawn_local(task);
    }
}
