//! jira-mermaid-core: Mermaid diagrams for Jira issue pages, without a browser.
//!
//! This crate provides:
//! - `HostDocument` / `SandboxHost` traits abstracting the page and its
//!   isolated rendering surfaces
//! - `BlockDetector` - strategy-based detection of fenced Mermaid blocks
//! - `SandboxRenderer` - one sandboxed surface per diagram, with a shared
//!   template fetch
//! - `Dispatcher` - correlation ids, the window registry, and the
//!   `BEFORE_RENDER`/`AFTER_RENDER` handshake
//! - `Pipeline` and `MutationWatcher` - detection passes driven by page
//!   mutations
//!
//! With the `memory` feature, `memory::MemoryHost` implements the platform
//! traits over an in-memory tree.

pub mod config;
pub mod detect;
pub mod error;
pub mod fullscreen;
#[cfg(any(test, feature = "memory"))]
pub mod memory;
pub mod pipeline;
pub mod placeholder;
pub mod platform;
pub mod protocol;
pub mod registry;
pub mod renderer;
pub mod router;
pub mod selector;
pub mod template;
pub mod watcher;

pub use config::{EmbedConfig, ResolvedConfig};
pub use detect::{
    BlockDetector, CandidateBlock, DetectStrategy, EditGuard, FencedTextStrategy,
    FormatterErrorStrategy, extract_fenced,
};
pub use error::{ConfigError, RenderError, TemplateError};
pub use fullscreen::enter_full_screen;
pub use pipeline::{PassReport, Pipeline};
pub use placeholder::{DisclosureLifecycle, Placeholder, build_placeholder, parse_title};
pub use platform::{HostDocument, PendingSurface, PlatformError, RenderSurface, SandboxHost};
pub use protocol::{CrossContextMessage, InboundMessage, SurfaceEvent, WindowId};
pub use registry::{RenderLifecycle, SessionState, WindowRegistry};
pub use renderer::{EnterFullScreen, ExitFullScreen, RenderOptions, SandboxRenderer};
pub use router::Dispatcher;
pub use selector::{Selector, SelectorError, SelectorList};
pub use smol_str::SmolStr;
pub use template::{TemplateProvider, substitute};
pub use watcher::{MutationWatcher, WatchPhase};
