//! Sandbox renderer: one isolated surface per diagram.

use std::rc::Rc;

use crate::error::RenderError;
use crate::platform::{PendingSurface, RenderSurface, SandboxHost};
use crate::protocol::{CrossContextMessage, WindowId};
use crate::registry::RenderLifecycle;
use crate::router::Dispatcher;
use crate::template::{substitute, TemplateProvider};

/// Called with the diagram source when the user asks for full screen.
pub type EnterFullScreen = Rc<dyn Fn(String)>;
/// Called when the user leaves full screen.
pub type ExitFullScreen = Rc<dyn Fn()>;

#[derive(Clone, Default)]
pub struct RenderOptions {
    pub full_screen: bool,
    pub enter_full_screen: Option<EnterFullScreen>,
    pub exit_full_screen: Option<ExitFullScreen>,
    pub lifecycle: Option<Rc<dyn RenderLifecycle>>,
}

pub struct SandboxRenderer<H: SandboxHost> {
    host: Rc<H>,
    dispatcher: Rc<Dispatcher<H::Surface>>,
    template: Rc<TemplateProvider>,
    aspect_ratio: Rc<str>,
}

impl<H: SandboxHost> Clone for SandboxRenderer<H> {
    fn clone(&self) -> Self {
        Self {
            host: self.host.clone(),
            dispatcher: self.dispatcher.clone(),
            template: self.template.clone(),
            aspect_ratio: self.aspect_ratio.clone(),
        }
    }
}

impl<H: SandboxHost + 'static> SandboxRenderer<H> {
    pub fn new(
        host: Rc<H>,
        dispatcher: Rc<Dispatcher<H::Surface>>,
        template: Rc<TemplateProvider>,
        aspect_ratio: &str,
    ) -> Self {
        Self {
            host,
            dispatcher,
            template,
            aspect_ratio: Rc::from(aspect_ratio),
        }
    }

    pub fn host(&self) -> &Rc<H> {
        &self.host
    }

    pub fn dispatcher(&self) -> &Rc<Dispatcher<H::Surface>> {
        &self.dispatcher
    }

    /// Render `source` into a new surface under `mount`.
    ///
    /// Resolves once the surface has loaded and been told its id, not once
    /// the diagram is drawn; that is reported to the lifecycle's
    /// `after_render`.
    pub async fn render(
        &self,
        mount: &H::Node,
        source: &str,
        options: RenderOptions,
    ) -> Result<WindowId, RenderError> {
        let window_id = self.dispatcher.allocate_id();

        let template = self.template.get(&*self.host).await?;
        let srcdoc = substitute(&template, source, options.full_screen)?;

        let PendingSurface { surface, loaded } =
            self.host.create_surface(&srcdoc, options.full_screen)?;
        // Registered before attaching: an unattached surface cannot load,
        // so it cannot message us before its session exists.
        self.dispatcher
            .register(window_id, surface.clone(), options.lifecycle.clone());
        self.host.attach_surface(mount, &surface)?;
        if !options.full_screen {
            self.host
                .set_style(mount, "aspect-ratio", &self.aspect_ratio)?;
        }

        loaded.await?;
        tracing::debug!(%window_id, full_screen = options.full_screen, "surface loaded");

        surface.post_message(&CrossContextMessage::WindowId { value: window_id })?;
        self.host.fill_surface(&surface)?;

        let source = source.to_string();
        let RenderOptions {
            enter_full_screen,
            exit_full_screen,
            ..
        } = options;
        self.host.bind_fullscreen_trigger(
            &surface,
            Box::new(move || {
                if let Some(enter) = &enter_full_screen {
                    enter(source.clone());
                }
                if let Some(exit) = &exit_full_screen {
                    exit();
                }
            }),
        )?;

        Ok(window_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryHost;
    use crate::platform::HostDocument;
    use crate::registry::SessionState;
    use std::cell::RefCell;

    const TEMPLATE: &str = r#"<body class="[[FULL_SCREEN_CLASS]]"><script>const code = JSON.parse([[MERMAID_CODE]]);</script></body>"#;

    fn renderer(host: &Rc<MemoryHost>) -> SandboxRenderer<MemoryHost> {
        host.set_asset("mermaid-view.html", TEMPLATE);
        SandboxRenderer::new(
            host.clone(),
            Rc::new(Dispatcher::new()),
            Rc::new(TemplateProvider::new("mermaid-view.html")),
            "2 / 1",
        )
    }

    #[test]
    fn test_render_posts_window_id_after_load() {
        let host = Rc::new(MemoryHost::new());
        let renderer = renderer(&host);
        let mount = host.element("div").under(&host.body());

        let id = host.block_on(renderer.render(&mount, "A-->B", RenderOptions::default())).unwrap();

        let surface = &host.surfaces()[0];
        assert_eq!(id, WindowId(1));
        assert_eq!(surface.posted(), vec![CrossContextMessage::WindowId { value: id }]);
        assert!(surface.is_filled());
        assert!(surface.srcdoc().contains(r#"JSON.parse("\"A-->B\"")"#));
        assert!(surface.srcdoc().contains(r#"class="""#));
        assert_eq!(host.children(&mount), vec![surface.frame()]);
        assert_eq!(host.style(&mount, "aspect-ratio").as_deref(), Some("2 / 1"));
        assert_eq!(renderer.dispatcher().session_state(id), Some(SessionState::Created));
    }

    #[test]
    fn test_session_registered_before_load() {
        let host = Rc::new(MemoryHost::new());
        host.set_auto_load(false);
        let renderer = renderer(&host);
        let mount = host.element("div").under(&host.body());

        let result = Rc::new(RefCell::new(None));
        {
            let renderer = renderer.clone();
            let result = result.clone();
            host.spawn(Box::pin(async move {
                *result.borrow_mut() = Some(renderer.render(&mount, "A", RenderOptions::default()).await);
            }));
        }
        host.run_until_stalled();

        // Attached and registered, still loading.
        let surface = host.surfaces()[0].clone();
        assert!(surface.is_attached());
        assert_eq!(renderer.dispatcher().live_sessions(), 1);
        assert!(surface.posted().is_empty());
        assert!(result.borrow().is_none());

        surface.finish_load();
        host.run_until_stalled();
        assert!(matches!(*result.borrow(), Some(Ok(WindowId(1)))));
        assert_eq!(surface.posted().len(), 1);
    }

    #[test]
    fn test_concurrent_renders_get_distinct_ids() {
        let host = Rc::new(MemoryHost::new());
        host.set_auto_load(false);
        let renderer = renderer(&host);
        let body = host.body();
        let results = Rc::new(RefCell::new(Vec::new()));
        for source in ["A", "B"] {
            let mount = host.element("div").under(&body);
            let renderer = renderer.clone();
            let results = results.clone();
            host.spawn(Box::pin(async move {
                let id = renderer
                    .render(&mount, source, RenderOptions::default())
                    .await
                    .unwrap();
                results.borrow_mut().push((source, id));
            }));
        }
        host.run_until_stalled();

        let surfaces = host.surfaces();
        assert_eq!(surfaces.len(), 2);
        assert_eq!(host.asset_fetches(), 1);
        assert_eq!(renderer.dispatcher().live_sessions(), 2);

        // Loads finish in reverse order; each render completes on its own.
        surfaces[1].finish_load();
        host.run_until_stalled();
        assert_eq!(*results.borrow(), vec![("B", WindowId(2))]);

        surfaces[0].finish_load();
        host.run_until_stalled();
        assert_eq!(*results.borrow(), vec![("B", WindowId(2)), ("A", WindowId(1))]);
    }

    #[test]
    fn test_full_screen_skips_aspect_ratio() {
        let host = Rc::new(MemoryHost::new());
        let renderer = renderer(&host);
        let mount = host.element("dialog").under(&host.body());
        let options = RenderOptions {
            full_screen: true,
            ..Default::default()
        };

        host.block_on(renderer.render(&mount, "A", options)).unwrap();

        let surface = &host.surfaces()[0];
        assert!(surface.is_full_screen());
        assert!(surface.srcdoc().contains(r#"class="full-screen""#));
        assert_eq!(host.style(&mount, "aspect-ratio"), None);
    }

    #[test]
    fn test_trigger_calls_enter_then_exit() {
        let host = Rc::new(MemoryHost::new());
        let renderer = renderer(&host);
        let mount = host.element("div").under(&host.body());
        let calls = Rc::new(RefCell::new(Vec::new()));
        let enter_calls = calls.clone();
        let exit_calls = calls.clone();
        let options = RenderOptions {
            enter_full_screen: Some(Rc::new(move |source: String| {
                enter_calls.borrow_mut().push(format!("enter:{source}"))
            })),
            exit_full_screen: Some(Rc::new(move || exit_calls.borrow_mut().push("exit".into()))),
            ..Default::default()
        };

        host.block_on(renderer.render(&mount, "A-->B", options)).unwrap();
        host.surfaces()[0].click_fullscreen();

        assert_eq!(*calls.borrow(), vec!["enter:A-->B".to_string(), "exit".to_string()]);
    }

    #[test]
    fn test_template_failure_surfaces_as_error() {
        let host = Rc::new(MemoryHost::new());
        host.fail_asset("mermaid-view.html", "missing");
        let renderer = SandboxRenderer::new(
            host.clone(),
            Rc::new(Dispatcher::new()),
            Rc::new(TemplateProvider::new("mermaid-view.html")),
            "2 / 1",
        );
        let mount = host.element("div").under(&host.body());

        let err = host
            .block_on(renderer.render(&mount, "A", RenderOptions::default()))
            .unwrap_err();
        assert!(matches!(err, RenderError::Template(_)));
        assert!(host.surfaces().is_empty());
    }
}
