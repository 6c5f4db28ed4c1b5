//! Startup wiring for the content script.

use std::rc::Rc;

use gloo_events::EventListener;
use jira_mermaid_core::{
    ConfigError, EmbedConfig, MutationWatcher, Pipeline, PlatformError, WatchPhase,
};

use crate::host::BrowserHost;
use crate::messages::listen_for_surface_messages;

#[derive(thiserror::Error, Debug)]
pub enum StartError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Everything the content script keeps alive for the life of the page.
///
/// Dropping it stops watching and removes the message listener; diagrams
/// already on the page stay.
pub struct Runtime {
    watcher: Rc<MutationWatcher<BrowserHost>>,
    _messages: EventListener,
}

impl Runtime {
    pub fn start(config: EmbedConfig) -> Result<Self, StartError> {
        let config = config.resolve()?;
        let host = Rc::new(BrowserHost::new()?);
        let pipeline = Rc::new(Pipeline::new(host.clone(), config));

        // Listening first: a surface can only message us after it loads,
        // but the initial pass starts loading surfaces right away.
        let messages = listen_for_surface_messages(host.window(), pipeline.dispatcher().clone());
        let watcher = MutationWatcher::new(pipeline);
        watcher.start()?;

        tracing::info!(phase = ?watcher.phase(), "mermaid embedding started");
        Ok(Self {
            watcher,
            _messages: messages,
        })
    }

    pub fn pipeline(&self) -> &Rc<Pipeline<BrowserHost>> {
        self.watcher.pipeline()
    }

    pub fn phase(&self) -> WatchPhase {
        self.watcher.phase()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.watcher.stop();
    }
}
