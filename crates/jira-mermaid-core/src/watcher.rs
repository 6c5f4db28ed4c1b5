//! Mutation watching.
//!
//! Startup runs one pass over the whole body. If the content container is
//! already on the page it is watched straight away; otherwise a bootstrap
//! observer on the body waits for it, handing off once it shows up and
//! giving up after the configured timeout. A container selector matching
//! `body` watches the whole page for its lifetime.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use futures::future::LocalBoxFuture;
use futures::FutureExt;

use crate::pipeline::{PassReport, Pipeline};
use crate::platform::{HostDocument, PlatformError, SandboxHost};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchPhase {
    /// Not started.
    Idle,
    /// Waiting for the content container to appear.
    Bootstrapping,
    /// Watching the content container for added nodes.
    Watching,
    /// The container never appeared; nothing is being watched.
    TimedOut,
}

pub struct MutationWatcher<H: SandboxHost + 'static> {
    pipeline: Rc<Pipeline<H>>,
    phase: Cell<WatchPhase>,
    observer: RefCell<Option<H::Observer>>,
}

impl<H: SandboxHost + 'static> MutationWatcher<H> {
    pub fn new(pipeline: Rc<Pipeline<H>>) -> Rc<Self> {
        Rc::new(Self {
            pipeline,
            phase: Cell::new(WatchPhase::Idle),
            observer: RefCell::new(None),
        })
    }

    pub fn phase(&self) -> WatchPhase {
        self.phase.get()
    }

    pub fn pipeline(&self) -> &Rc<Pipeline<H>> {
        &self.pipeline
    }

    pub fn start(self: &Rc<Self>) -> Result<(), PlatformError> {
        let host = self.pipeline.host();
        self.spawn_pass(self.pipeline.render_subtree(&host.body()));

        match self.pipeline.find_container() {
            Some(container) => self.watch_container(&container),
            None => self.bootstrap(),
        }
    }

    /// Stop watching, whatever the phase.
    pub fn stop(&self) {
        let observer = self.observer.borrow_mut().take();
        if let Some(observer) = observer {
            self.pipeline.host().disconnect(&observer);
        }
    }

    fn spawn_pass(&self, pass: LocalBoxFuture<'static, PassReport>) {
        self.pipeline.host().spawn(
            async move {
                let report = pass.await;
                if report.failed > 0 {
                    tracing::warn!(
                        failed = report.failed,
                        rendered = report.rendered,
                        "some diagrams failed to render"
                    );
                }
            }
            .boxed_local(),
        );
    }

    fn watch_container(self: &Rc<Self>, container: &H::Node) -> Result<(), PlatformError> {
        let weak: Weak<Self> = Rc::downgrade(self);
        let observer = self.pipeline.host().observe_added(
            container,
            Box::new(move |added| {
                if let Some(watcher) = weak.upgrade() {
                    watcher.spawn_pass(watcher.pipeline.render_added(&added));
                }
            }),
        )?;
        *self.observer.borrow_mut() = Some(observer);
        self.phase.set(WatchPhase::Watching);
        tracing::debug!("watching content container");
        Ok(())
    }

    fn bootstrap(self: &Rc<Self>) -> Result<(), PlatformError> {
        let host = self.pipeline.host();

        let weak: Weak<Self> = Rc::downgrade(self);
        let observer = host.observe_added(
            &host.body(),
            Box::new(move |_| {
                if let Some(watcher) = weak.upgrade() {
                    watcher.on_bootstrap_mutation();
                }
            }),
        )?;
        *self.observer.borrow_mut() = Some(observer);
        self.phase.set(WatchPhase::Bootstrapping);

        let timeout = self.pipeline.config().bootstrap_timeout;
        let sleep = host.sleep(timeout);
        let weak: Weak<Self> = Rc::downgrade(self);
        host.spawn(
            async move {
                sleep.await;
                if let Some(watcher) = weak.upgrade() {
                    watcher.on_bootstrap_timeout();
                }
            }
            .boxed_local(),
        );
        tracing::debug!(timeout_ms = timeout.as_millis() as u64, "waiting for content container");
        Ok(())
    }

    fn on_bootstrap_mutation(self: &Rc<Self>) {
        if self.phase.get() != WatchPhase::Bootstrapping {
            return;
        }
        let Some(container) = self.pipeline.find_container() else {
            return;
        };

        self.stop();
        // Whatever the container arrived with was never reported as added.
        self.spawn_pass(self.pipeline.render_subtree(&container));
        if let Err(e) = self.watch_container(&container) {
            tracing::error!(error = %e, "failed to watch content container");
            self.phase.set(WatchPhase::Idle);
        }
    }

    fn on_bootstrap_timeout(&self) {
        if self.phase.get() != WatchPhase::Bootstrapping {
            return;
        }
        self.stop();
        self.phase.set(WatchPhase::TimedOut);
        tracing::warn!("content container never appeared, no longer watching");
    }
}
