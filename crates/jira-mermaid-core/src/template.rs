//! Surface template loading and substitution.

use std::cell::RefCell;
use std::rc::Rc;

use futures::future::{LocalBoxFuture, Shared};
use futures::FutureExt;

use crate::error::TemplateError;
use crate::platform::SandboxHost;

/// Token replaced by the doubly JSON-encoded diagram source.
pub const SOURCE_TOKEN: &str = "[[MERMAID_CODE]]";
/// Token replaced by the full-screen class (or nothing).
pub const FULL_SCREEN_TOKEN: &str = "[[FULL_SCREEN_CLASS]]";
pub const FULL_SCREEN_CLASS: &str = "full-screen";

type TemplateFuture = Shared<LocalBoxFuture<'static, Result<Rc<str>, TemplateError>>>;

/// Fetches the template once per page and hands every caller the same
/// pending or resolved value.
///
/// A failed fetch is cached too; the template is a packaged asset, so a
/// failure will not go away by retrying.
pub struct TemplateProvider {
    path: String,
    cached: RefCell<Option<TemplateFuture>>,
}

impl TemplateProvider {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            cached: RefCell::new(None),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The shared template future, starting the fetch on first use.
    pub fn get<H: SandboxHost + ?Sized>(&self, host: &H) -> TemplateFuture {
        self.cached
            .borrow_mut()
            .get_or_insert_with(|| {
                tracing::debug!(path = %self.path, "fetching surface template");
                let path = self.path.clone();
                host.fetch_asset(&path)
                    .map(move |result| {
                        result
                            .map(Rc::from)
                            .map_err(|source| TemplateError::Fetch { path, source })
                    })
                    .boxed_local()
                    .shared()
            })
            .clone()
    }
}

/// Fill in a template for one render.
///
/// The source is JSON-encoded twice so it survives being pasted into a
/// string literal inside the template's script, and `<` is escaped so a
/// `</script>` in the source cannot close that script early.
pub fn substitute(template: &str, source: &str, full_screen: bool) -> Result<String, TemplateError> {
    let encode = |s: &str| serde_json::to_string(s).map_err(|e| TemplateError::Encode(e.to_string()));
    let encoded = encode(&encode(source)?)?.replace('<', "\\u003c");
    let class = if full_screen { FULL_SCREEN_CLASS } else { "" };

    // Class first, so tokens appearing inside the source are left alone.
    Ok(template
        .replace(FULL_SCREEN_TOKEN, class)
        .replace(SOURCE_TOKEN, &encoded))
}
