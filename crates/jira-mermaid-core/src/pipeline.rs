//! Detection passes: find blocks, swap in placeholders, render them.

use std::rc::Rc;

use futures::future::{join_all, LocalBoxFuture};
use futures::FutureExt;

use crate::config::ResolvedConfig;
use crate::detect::BlockDetector;
use crate::placeholder::{build_placeholder, DisclosureLifecycle};
use crate::platform::{HostDocument, SandboxHost};
use crate::renderer::{RenderOptions, SandboxRenderer};
use crate::router::Dispatcher;
use crate::template::TemplateProvider;

/// Outcome of one or more detection passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Blocks accepted by the detector.
    pub detected: usize,
    /// Blocks whose surface loaded and received its id.
    pub rendered: usize,
    /// Blocks that failed anywhere between placeholder and load.
    pub failed: usize,
}

impl PassReport {
    pub fn merge(self, other: PassReport) -> PassReport {
        PassReport {
            detected: self.detected + other.detected,
            rendered: self.rendered + other.rendered,
            failed: self.failed + other.failed,
        }
    }
}

pub struct Pipeline<H: SandboxHost + 'static> {
    host: Rc<H>,
    detector: BlockDetector<H>,
    renderer: SandboxRenderer<H>,
    config: ResolvedConfig,
}

impl<H: SandboxHost + 'static> Pipeline<H> {
    pub fn new(host: Rc<H>, config: ResolvedConfig) -> Self {
        let detector = BlockDetector::from_config(&config);
        let renderer = SandboxRenderer::new(
            host.clone(),
            Rc::new(Dispatcher::new()),
            Rc::new(TemplateProvider::new(config.template_path.clone())),
            &config.aspect_ratio,
        );
        tracing::debug!(strategies = ?detector.strategy_names(), "pipeline ready");
        Self {
            host,
            detector,
            renderer,
            config,
        }
    }

    pub fn host(&self) -> &Rc<H> {
        &self.host
    }

    pub fn renderer(&self) -> &SandboxRenderer<H> {
        &self.renderer
    }

    pub fn dispatcher(&self) -> &Rc<Dispatcher<H::Surface>> {
        self.renderer.dispatcher()
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// The content container, if the page has one yet. The body itself
    /// counts when it matches, which keeps the whole page watched.
    pub fn find_container(&self) -> Option<H::Node> {
        let body = self.host.body();
        if self.config.container.matches(&*self.host, &body) {
            return Some(body);
        }
        self.host.query_first(&body, &self.config.container)
    }

    /// Run one detection pass over the descendants of `root`.
    ///
    /// Detection and placeholder replacement happen before this returns, so
    /// a second pass over the same tree finds nothing. The returned future
    /// drives the renders and resolves once every block has settled; one
    /// block failing never stops the others.
    pub fn render_subtree(&self, root: &H::Node) -> LocalBoxFuture<'static, PassReport> {
        let blocks = self.detector.detect(&*self.host, root);
        let mut report = PassReport {
            detected: blocks.len(),
            ..Default::default()
        };

        let mut renders = Vec::with_capacity(blocks.len());
        for block in blocks {
            let placeholder = match build_placeholder(&*self.host, &block) {
                Ok(placeholder) => placeholder,
                Err(e) => {
                    tracing::error!(error = %e, "failed to place diagram disclosure");
                    report.failed += 1;
                    continue;
                }
            };
            let lifecycle = Rc::new(DisclosureLifecycle::new(
                self.host.clone(),
                placeholder.disclosure.clone(),
            ));
            let options = RenderOptions {
                full_screen: false,
                enter_full_screen: Some(self.renderer.full_screen_launcher()),
                exit_full_screen: None,
                lifecycle: Some(lifecycle),
            };
            let renderer = self.renderer.clone();
            let source = block.diagram_source;
            renders.push(
                async move { renderer.render(&placeholder.mount, &source, options).await }
                    .boxed_local(),
            );
        }

        async move {
            for result in join_all(renders).await {
                match result {
                    Ok(window_id) => {
                        tracing::trace!(%window_id, "diagram surface ready");
                        report.rendered += 1;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "diagram failed to render");
                        report.failed += 1;
                    }
                }
            }
            if report.detected > 0 {
                tracing::debug!(?report, "detection pass finished");
            }
            report
        }
        .boxed_local()
    }

    /// Run passes for a batch of nodes added to the page.
    ///
    /// Sessions whose surfaces have left the page are evicted first.
    /// Detached nodes are skipped; a node that is itself a candidate is
    /// scanned through its parent.
    pub fn render_added(&self, added: &[H::Node]) -> LocalBoxFuture<'static, PassReport> {
        let swept = self.dispatcher().sweep_detached();
        if swept > 0 {
            tracing::debug!(swept, "evicted detached render sessions");
        }

        let mut roots: Vec<H::Node> = Vec::new();
        for node in added {
            if !self.host.is_connected(node) {
                continue;
            }
            let root = if self.config.candidates.matches(&*self.host, node) {
                match self.host.parent(node) {
                    Some(parent) => parent,
                    None => continue,
                }
            } else {
                node.clone()
            };
            if !roots.contains(&root) {
                roots.push(root);
            }
        }

        let passes: Vec<_> = roots.iter().map(|root| self.render_subtree(root)).collect();
        async move {
            join_all(passes)
                .await
                .into_iter()
                .fold(PassReport::default(), PassReport::merge)
        }
        .boxed_local()
    }
}
