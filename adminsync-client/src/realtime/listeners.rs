//! Named-event listener registry.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use adminsync_cache::QueryCache;
use adminsync_core::events::{ALERT_NEW, ALERT_UPDATE, JOB_STATS, JOB_UPDATE};
use adminsync_core::{change_for, Frame};
use uuid::Uuid;

/// Events whose arrival invalidates cached reads.
pub const CACHE_EVENTS: [&str; 4] = [JOB_UPDATE, JOB_STATS, ALERT_NEW, ALERT_UPDATE];

/// Handle returned on registration; pass it back to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl ListenerId {
    fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub type Listener = Arc<dyn Fn(&Frame) + Send + Sync>;

#[derive(Default)]
pub struct ListenerRegistry {
    by_event: HashMap<String, Vec<(ListenerId, Listener)>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&mut self, event: impl Into<String>, listener: Listener) -> ListenerId {
        let id = ListenerId::new();
        self.by_event
            .entry(event.into())
            .or_default()
            .push((id, listener));
        id
    }

    /// Remove a listener. Unknown ids are ignored.
    pub fn off(&mut self, id: ListenerId) -> bool {
        let mut removed = false;
        self.by_event.retain(|_, listeners| {
            let before = listeners.len();
            listeners.retain(|(listener_id, _)| *listener_id != id);
            removed |= listeners.len() != before;
            !listeners.is_empty()
        });
        removed
    }

    pub fn listeners_for(&self, event: &str) -> Vec<Listener> {
        self.by_event
            .get(event)
            .map(|listeners| listeners.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default()
    }

    pub fn count(&self, event: &str) -> usize {
        self.by_event.get(event).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.by_event.is_empty()
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<&str, usize> = self
            .by_event
            .iter()
            .map(|(event, listeners)| (event.as_str(), listeners.len()))
            .collect();
        f.debug_struct("ListenerRegistry").field("events", &counts).finish()
    }
}

/// Registry shared between a manager and its handles.
#[derive(Debug, Clone, Default)]
pub struct SharedListeners {
    inner: Arc<RwLock<ListenerRegistry>>,
}

impl SharedListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, event: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        self.write().on(event, Arc::new(listener))
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.write().off(id)
    }

    pub fn count(&self, event: &str) -> usize {
        self.read().count(event)
    }

    /// Call every listener registered for the frame's event. Returns how many
    /// ran.
    ///
    /// Listeners run outside the registry lock, so they may register or
    /// unregister listeners themselves.
    pub fn dispatch(&self, frame: &Frame) -> usize {
        let listeners = self.read().listeners_for(&frame.event);
        for listener in &listeners {
            listener(frame);
        }
        listeners.len()
    }

    fn read(&self) -> RwLockReadGuard<'_, ListenerRegistry> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, ListenerRegistry> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Register the default listener: every cache-relevant event is mapped to
/// its [`Change`](adminsync_core::Change) and applied to `cache`.
pub fn install_cache_listener(listeners: &SharedListeners, cache: QueryCache) -> Vec<ListenerId> {
    CACHE_EVENTS
        .iter()
        .map(|event| {
            let cache = cache.clone();
            listeners.on(*event, move |frame: &Frame| {
                if let Some(change) = change_for(&frame.event, &frame.data) {
                    let removed = cache.apply_change(&change);
                    tracing::debug!(event = %frame.event, change = %change.kind, removed, "Push event invalidated cache");
                }
            })
        })
        .collect()
}
