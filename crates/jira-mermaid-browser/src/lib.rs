//! Browser layer for jira-mermaid.
//!
//! Implements the core platform traits over the live page with `web-sys`
//! and wires the pipeline to the page: surface messages, mutation
//! observers and timers. It assumes a `wasm32-unknown-unknown` target
//! running as a Chrome extension content script.
//!
//! # Architecture
//!
//! - `host`: `BrowserHost` (elements, `<iframe srcdoc>` surfaces, observers)
//! - `messages`: window `message` listener feeding the dispatcher
//! - `runtime`: `Runtime::start`, the content script entrypoint
//!
//! # Re-exports
//!
//! This crate re-exports `jira-mermaid-core` for convenience, so consumers
//! only need to depend on `jira-mermaid-browser`.

// Re-export core crate
pub use jira_mermaid_core;
pub use jira_mermaid_core::*;

pub mod host;
pub mod messages;
pub mod runtime;

pub use host::{BrowserHost, BrowserObserver, BrowserSurface};
pub use messages::listen_for_surface_messages;
pub use runtime::{Runtime, StartError};
