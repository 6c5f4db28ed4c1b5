//! Surface -> host messages.

use std::rc::Rc;

use gloo_events::EventListener;
use jira_mermaid_core::Dispatcher;
use wasm_bindgen::JsCast;
use web_sys::{MessageEvent, Window};

use crate::host::BrowserSurface;

/// Feed every `message` event posted to `window` into `dispatcher`.
///
/// Payloads that are not plain JSON-shaped data are dropped here; the
/// dispatcher ignores anything that is not one of its messages. The
/// listener is removed when the returned handle is dropped.
pub fn listen_for_surface_messages(
    window: &Window,
    dispatcher: Rc<Dispatcher<BrowserSurface>>,
) -> EventListener {
    EventListener::new(window, "message", move |event| {
        let Some(event) = event.dyn_ref::<MessageEvent>() else {
            return;
        };
        let value: serde_json::Value = match serde_wasm_bindgen::from_value(event.data()) {
            Ok(value) => value,
            Err(e) => {
                tracing::trace!(error = %e, "ignoring non-JSON message");
                return;
            }
        };
        let dispatcher = dispatcher.clone();
        wasm_bindgen_futures::spawn_local(async move {
            dispatcher.handle_message(&value).await;
        });
    })
}
