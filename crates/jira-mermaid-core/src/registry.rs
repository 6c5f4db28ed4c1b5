//! Window registry: correlation id -> render session.

use std::collections::HashMap;
use std::rc::Rc;

use futures::future::{LocalBoxFuture, Shared};
use futures::FutureExt;

use crate::platform::RenderSurface;
use crate::protocol::WindowId;

/// Two-phase lifecycle a render exposes to whoever owns its mount.
///
/// `before_render` runs when the surface asks for the `BEFORE_RENDER`
/// barrier; the ack is only sent once its future completes.
/// `after_render` runs when the surface reports it has finished drawing.
/// Each runs at most once per session.
pub trait RenderLifecycle {
    fn before_render(&self) -> LocalBoxFuture<'static, ()> {
        futures::future::ready(()).boxed_local()
    }

    fn after_render(&self) {}
}

/// Where a session is in the render handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Registered, surface loading or not yet asked for the barrier.
    Created,
    /// `before_render` is running; the ack has not been sent.
    AwaitingAck,
    /// Ack sent, the surface is drawing.
    Rendering,
}

pub(crate) struct Session<S> {
    pub(crate) surface: S,
    pub(crate) lifecycle: Option<Rc<dyn RenderLifecycle>>,
    pub(crate) state: SessionState,
    /// Completion of `before_render`, shared by duplicate requests.
    pub(crate) barrier: Option<Shared<LocalBoxFuture<'static, ()>>>,
}

/// Insert, lookup and eviction for live sessions.
///
/// Sessions are removed as soon as they finish (`AFTER_RENDER`) or their
/// surface leaves the page, so the map only ever holds sessions whose
/// surface may still talk to us.
pub struct WindowRegistry<S> {
    sessions: HashMap<WindowId, Session<S>>,
}

impl<S> Default for WindowRegistry<S> {
    fn default() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }
}

impl<S: RenderSurface> WindowRegistry<S> {
    pub fn insert(
        &mut self,
        id: WindowId,
        surface: S,
        lifecycle: Option<Rc<dyn RenderLifecycle>>,
    ) {
        let previous = self.sessions.insert(
            id,
            Session {
                surface,
                lifecycle,
                state: SessionState::Created,
                barrier: None,
            },
        );
        debug_assert!(previous.is_none(), "window id {id} registered twice");
    }

    pub(crate) fn get_mut(&mut self, id: WindowId) -> Option<&mut Session<S>> {
        self.sessions.get_mut(&id)
    }

    pub(crate) fn remove(&mut self, id: WindowId) -> Option<Session<S>> {
        self.sessions.remove(&id)
    }

    pub fn state(&self, id: WindowId) -> Option<SessionState> {
        self.sessions.get(&id).map(|s| s.state)
    }

    pub fn contains(&self, id: WindowId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Evict sessions whose surface is no longer attached.
    pub fn sweep_detached(&mut self) -> Vec<WindowId> {
        let abandoned: Vec<WindowId> = self
            .sessions
            .iter()
            .filter(|(_, session)| !session.surface.is_attached())
            .map(|(id, _)| *id)
            .collect();
        for id in &abandoned {
            if let Some(session) = self.sessions.remove(id) {
                tracing::debug!(window_id = %id, state = ?session.state, "evicting abandoned render session");
            }
        }
        abandoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryHost;
    use crate::platform::{HostDocument, SandboxHost};

    #[test]
    fn test_insert_and_remove() {
        let host = MemoryHost::new();
        let surface = host.create_surface("", false).unwrap().surface;
        let mut registry = WindowRegistry::default();
        assert!(registry.is_empty());

        registry.insert(WindowId(7), surface, None);
        assert!(registry.contains(WindowId(7)));
        assert_eq!(registry.state(WindowId(7)), Some(SessionState::Created));

        assert!(registry.remove(WindowId(7)).is_some());
        assert!(registry.remove(WindowId(7)).is_none());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_sweep_keeps_attached_sessions() {
        let host = MemoryHost::new();
        let body = host.body();
        let attached = host.create_surface("", false).unwrap().surface;
        host.attach_surface(&body, &attached).unwrap();
        let never_attached = host.create_surface("", false).unwrap().surface;

        let mut registry = WindowRegistry::default();
        registry.insert(WindowId(1), attached, None);
        registry.insert(WindowId(2), never_attached, None);

        assert_eq!(registry.sweep_detached(), vec![WindowId(2)]);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(WindowId(1)));
    }
}
