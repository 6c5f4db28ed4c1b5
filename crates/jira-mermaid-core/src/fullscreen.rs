//! Full-screen overlay for a single diagram.

use std::rc::Rc;

use futures::FutureExt;

use crate::error::RenderError;
use crate::platform::{HostDocument, SandboxHost};
use crate::protocol::WindowId;
use crate::renderer::{EnterFullScreen, ExitFullScreen, RenderOptions, SandboxRenderer};

const OVERLAY_STYLE: [(&str, &str); 5] = [
    ("width", "95dvw"),
    ("height", "95dvh"),
    ("box-sizing", "border-box"),
    ("padding", "1em"),
    ("overflow", "hidden"),
];

/// Render `source` into a fresh modal overlay on top of the page.
///
/// The overlay is opened once the surface has loaded. Its own full-screen
/// control closes it again. If rendering fails the overlay is removed.
pub async fn enter_full_screen<H: SandboxHost + 'static>(
    renderer: &SandboxRenderer<H>,
    source: &str,
) -> Result<WindowId, RenderError> {
    let host = renderer.host().clone();
    let overlay = host.create_element("dialog")?;
    for (property, value) in OVERLAY_STYLE {
        host.set_style(&overlay, property, value)?;
    }
    host.append_child(&host.body(), &overlay)?;

    let exit: ExitFullScreen = {
        let host = host.clone();
        let overlay = overlay.clone();
        Rc::new(move || {
            tracing::debug!("leaving full screen");
            host.remove(&overlay);
        })
    };
    let options = RenderOptions {
        full_screen: true,
        exit_full_screen: Some(exit),
        ..Default::default()
    };

    let result = async {
        let window_id = renderer.render(&overlay, source, options).await?;
        host.show_modal(&overlay)?;
        Ok::<_, RenderError>(window_id)
    }
    .await;

    if result.is_err() {
        host.remove(&overlay);
    }
    result
}

impl<H: SandboxHost + 'static> SandboxRenderer<H> {
    /// An `enter_full_screen` callback that opens the overlay on the host's
    /// event loop.
    pub fn full_screen_launcher(&self) -> EnterFullScreen {
        let renderer = self.clone();
        Rc::new(move |source: String| {
            let task_renderer = renderer.clone();
            renderer.host().spawn(
                async move {
                    match enter_full_screen(&task_renderer, &source).await {
                        Ok(window_id) => tracing::debug!(%window_id, "opened full-screen diagram"),
                        Err(e) => tracing::warn!(error = %e, "failed to open full-screen diagram"),
                    }
                }
                .boxed_local(),
            );
        })
    }
}
