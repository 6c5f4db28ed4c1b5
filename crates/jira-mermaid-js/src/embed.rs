//! `start` / `startWithConfig` / `stop`.

use std::cell::RefCell;

use jira_mermaid_browser::{EmbedConfig, Runtime};
use wasm_bindgen::prelude::*;

thread_local! {
    static RUNTIME: RefCell<Option<Runtime>> = const { RefCell::new(None) };
}

/// Start embedding diagrams with the default configuration.
#[wasm_bindgen]
pub fn start() -> Result<(), JsError> {
    install(EmbedConfig::default())
}

/// Start embedding diagrams, overriding any subset of the configuration.
///
/// Keys are the camelCase field names, e.g.
/// `{ containerSelector: ".wiki-content", bootstrapTimeoutMs: 5000 }`.
#[wasm_bindgen(js_name = startWithConfig)]
pub fn start_with_config(config: JsValue) -> Result<(), JsError> {
    let config: EmbedConfig = if config.is_undefined() || config.is_null() {
        EmbedConfig::default()
    } else {
        serde_wasm_bindgen::from_value(config)
            .map_err(|e| JsError::new(&format!("Invalid config: {}", e)))?
    };
    install(config)
}

/// Stop watching the page. Diagrams already rendered stay.
#[wasm_bindgen]
pub fn stop() {
    let runtime = RUNTIME.with(|slot| slot.borrow_mut().take());
    if runtime.is_some() {
        tracing::info!("mermaid embedding stopped");
    }
}

fn install(config: EmbedConfig) -> Result<(), JsError> {
    let running = RUNTIME.with(|slot| slot.borrow().is_some());
    if running {
        return Err(JsError::new("already started"));
    }
    let runtime = Runtime::start(config).map_err(|e| JsError::new(&e.to_string()))?;
    RUNTIME.with(|slot| *slot.borrow_mut() = Some(runtime));
    Ok(())
}
