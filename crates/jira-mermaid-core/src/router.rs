//! Host-side message router.
//!
//! `Dispatcher` owns the correlation id counter and the window registry.
//! One instance is created at startup and lives as long as the page; the
//! platform feeds it every `message` event it receives.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::FutureExt;
use serde_json::Value;

use crate::platform::RenderSurface;
use crate::protocol::{CrossContextMessage, InboundMessage, SurfaceEvent, WindowId};
use crate::registry::{RenderLifecycle, SessionState, WindowRegistry};

pub struct Dispatcher<S> {
    last_id: Cell<u64>,
    registry: RefCell<WindowRegistry<S>>,
}

impl<S: RenderSurface + Clone + 'static> Default for Dispatcher<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: RenderSurface + Clone + 'static> Dispatcher<S> {
    pub fn new() -> Self {
        Self {
            last_id: Cell::new(0),
            registry: RefCell::new(WindowRegistry::default()),
        }
    }

    /// Next correlation id. Starts at 1, never repeats.
    pub fn allocate_id(&self) -> WindowId {
        let next = self.last_id.get() + 1;
        self.last_id.set(next);
        WindowId(next)
    }

    pub fn register(
        &self,
        id: WindowId,
        surface: S,
        lifecycle: Option<Rc<dyn RenderLifecycle>>,
    ) {
        tracing::trace!(window_id = %id, "registering render session");
        self.registry.borrow_mut().insert(id, surface, lifecycle);
    }

    pub fn session_state(&self, id: WindowId) -> Option<SessionState> {
        self.registry.borrow().state(id)
    }

    /// Number of live sessions.
    pub fn live_sessions(&self) -> usize {
        self.registry.borrow().len()
    }

    /// Evict sessions whose surface has left the page.
    pub fn sweep_detached(&self) -> usize {
        self.registry.borrow_mut().sweep_detached().len()
    }

    /// Validate a raw posted value and dispatch it. Malformed values and
    /// unknown ids are ignored.
    pub async fn handle_message(&self, value: &Value) {
        if let Some(message) = InboundMessage::from_value(value) {
            self.dispatch(message).await;
        }
    }

    pub async fn dispatch(&self, message: InboundMessage) {
        match message.event {
            SurfaceEvent::BeforeRender => self.before_render(message.window_id).await,
            SurfaceEvent::AfterRender => self.after_render(message.window_id),
        }
    }

    async fn before_render(&self, id: WindowId) {
        let (surface, existing, lifecycle) = {
            let mut registry = self.registry.borrow_mut();
            let Some(session) = registry.get_mut(id) else {
                return;
            };
            if session.state == SessionState::Created {
                session.state = SessionState::AwaitingAck;
            }
            (
                session.surface.clone(),
                session.barrier.clone(),
                session.lifecycle.clone(),
            )
        };

        let barrier = match existing {
            Some(barrier) => barrier,
            None => {
                // Run the hook outside the registry borrow; it may touch
                // arbitrary host state.
                let hook = match lifecycle {
                    Some(lifecycle) => lifecycle.before_render(),
                    None => futures::future::ready(()).boxed_local(),
                };
                let barrier = hook.shared();
                if let Some(session) = self.registry.borrow_mut().get_mut(id) {
                    session.barrier = Some(barrier.clone());
                }
                barrier
            }
        };

        barrier.await;

        if let Some(session) = self.registry.borrow_mut().get_mut(id) {
            if session.state == SessionState::AwaitingAck {
                session.state = SessionState::Rendering;
            }
        }

        tracing::trace!(window_id = %id, "acknowledging before-render");
        if let Err(e) = surface.post_message(&CrossContextMessage::BeforeRenderAck) {
            tracing::warn!(window_id = %id, error = %e, "failed to post before-render ack");
        }
    }

    fn after_render(&self, id: WindowId) {
        let Some(session) = self.registry.borrow_mut().remove(id) else {
            return;
        };
        tracing::trace!(window_id = %id, "render finished, evicting session");
        if let Some(lifecycle) = session.lifecycle {
            lifecycle.after_render();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryHost, MemorySurface};
    use crate::platform::{HostDocument, SandboxHost};
    use futures::channel::oneshot;
    use futures::future::LocalBoxFuture;
    use serde_json::json;

    /// Lifecycle whose `before_render` finishes only when the test says so.
    #[derive(Default)]
    struct Gated {
        gate: RefCell<Option<oneshot::Receiver<()>>>,
        before_calls: Cell<usize>,
        after_calls: Cell<usize>,
    }

    impl RenderLifecycle for Gated {
        fn before_render(&self) -> LocalBoxFuture<'static, ()> {
            self.before_calls.set(self.before_calls.get() + 1);
            let gate = self.gate.borrow_mut().take();
            async move {
                if let Some(gate) = gate {
                    let _ = gate.await;
                }
            }
            .boxed_local()
        }

        fn after_render(&self) {
            self.after_calls.set(self.after_calls.get() + 1);
        }
    }

    fn attached_surface(host: &MemoryHost) -> MemorySurface {
        let pending = host.create_surface("", false).unwrap();
        host.attach_surface(&host.body(), &pending.surface).unwrap();
        pending.surface
    }

    fn acks(surface: &MemorySurface) -> usize {
        surface
            .posted()
            .iter()
            .filter(|m| **m == CrossContextMessage::BeforeRenderAck)
            .count()
    }

    fn spawn_message(host: &MemoryHost, dispatcher: &Rc<Dispatcher<MemorySurface>>, value: Value) {
        let dispatcher = dispatcher.clone();
        host.spawn(async move { dispatcher.handle_message(&value).await }.boxed_local());
    }

    #[test]
    fn test_ids_strictly_increase() {
        let dispatcher = Dispatcher::<MemorySurface>::new();
        let ids: Vec<_> = (0..5).map(|_| dispatcher.allocate_id()).collect();
        assert_eq!(ids.first(), Some(&WindowId(1)));
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_ack_waits_for_before_render_hook() {
        let host = MemoryHost::new();
        let dispatcher = Rc::new(Dispatcher::new());
        let surface = attached_surface(&host);
        let (open_gate, gate) = oneshot::channel();
        let lifecycle = Rc::new(Gated {
            gate: RefCell::new(Some(gate)),
            ..Default::default()
        });
        let id = dispatcher.allocate_id();
        dispatcher.register(id, surface.clone(), Some(lifecycle.clone()));

        spawn_message(&host, &dispatcher, json!({ "type": "BEFORE_RENDER", "windowId": id.0 }));
        host.run_until_stalled();

        assert_eq!(lifecycle.before_calls.get(), 1);
        assert_eq!(acks(&surface), 0);
        assert_eq!(dispatcher.session_state(id), Some(SessionState::AwaitingAck));

        open_gate.send(()).unwrap();
        host.run_until_stalled();

        assert_eq!(acks(&surface), 1);
        assert_eq!(dispatcher.session_state(id), Some(SessionState::Rendering));
    }

    #[test]
    fn test_duplicate_before_render_shares_hook() {
        let host = MemoryHost::new();
        let dispatcher = Rc::new(Dispatcher::new());
        let surface = attached_surface(&host);
        let (open_gate, gate) = oneshot::channel();
        let lifecycle = Rc::new(Gated {
            gate: RefCell::new(Some(gate)),
            ..Default::default()
        });
        let id = dispatcher.allocate_id();
        dispatcher.register(id, surface.clone(), Some(lifecycle.clone()));

        let msg = json!({ "type": "BEFORE_RENDER", "windowId": id.0 });
        spawn_message(&host, &dispatcher, msg.clone());
        spawn_message(&host, &dispatcher, msg);
        host.run_until_stalled();
        assert_eq!(acks(&surface), 0);

        open_gate.send(()).unwrap();
        host.run_until_stalled();

        assert_eq!(lifecycle.before_calls.get(), 1);
        assert_eq!(acks(&surface), 2);
    }

    #[test]
    fn test_after_render_runs_hook_and_evicts() {
        let host = MemoryHost::new();
        let dispatcher = Dispatcher::new();
        let surface = attached_surface(&host);
        let lifecycle = Rc::new(Gated::default());
        let id = dispatcher.allocate_id();
        dispatcher.register(id, surface, Some(lifecycle.clone()));

        let after = json!({ "type": "AFTER_RENDER", "windowId": id.0 });
        host.block_on(dispatcher.handle_message(&after));
        host.block_on(dispatcher.handle_message(&after));

        assert_eq!(lifecycle.after_calls.get(), 1);
        assert_eq!(dispatcher.session_state(id), None);
        assert_eq!(dispatcher.live_sessions(), 0);
    }

    #[test]
    fn test_sessions_without_lifecycle_still_ack() {
        let host = MemoryHost::new();
        let dispatcher = Dispatcher::new();
        let surface = attached_surface(&host);
        let id = dispatcher.allocate_id();
        dispatcher.register(id, surface.clone(), None);

        host.block_on(dispatcher.handle_message(&json!({ "type": "BEFORE_RENDER", "windowId": id.0 })));
        assert_eq!(surface.posted(), vec![CrossContextMessage::BeforeRenderAck]);
    }

    #[test]
    fn test_unknown_and_malformed_messages_are_ignored() {
        let host = MemoryHost::new();
        let dispatcher = Dispatcher::new();
        let surface = attached_surface(&host);
        let id = dispatcher.allocate_id();
        dispatcher.register(id, surface.clone(), None);

        for value in [
            json!({ "type": "BEFORE_RENDER", "windowId": 99 }),
            json!([{ "type": "BEFORE_RENDER", "windowId": id.0 }]),
            json!({ "type": "BEFORE_RENDER" }),
            json!("hello"),
        ] {
            host.block_on(dispatcher.handle_message(&value));
        }

        assert!(surface.posted().is_empty());
        assert_eq!(dispatcher.session_state(id), Some(SessionState::Created));
    }

    #[test]
    fn test_sweep_evicts_detached_surfaces() {
        let host = MemoryHost::new();
        let dispatcher = Dispatcher::new();
        let kept = attached_surface(&host);
        let dropped = attached_surface(&host);
        let kept_id = dispatcher.allocate_id();
        let dropped_id = dispatcher.allocate_id();
        dispatcher.register(kept_id, kept, None);
        dispatcher.register(dropped_id, dropped.clone(), None);

        host.remove(&dropped.frame());

        assert_eq!(dispatcher.sweep_detached(), 1);
        assert_eq!(dispatcher.session_state(kept_id), Some(SessionState::Created));
        assert_eq!(dispatcher.session_state(dropped_id), None);
    }
}
