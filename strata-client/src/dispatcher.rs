use dashmap::DashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use strata_core::model::{EventKind, SfuEvent};
use tracing::{error, trace, warn};

pub type EventHandler = Arc<dyn Fn(&SfuEvent) -> anyhow::Result<()> + Send + Sync>;

type Registry = DashMap<EventKind, Vec<(u64, EventHandler)>>;

/// Fans decoded SFU events out to the handlers registered for their kind.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Arc<Registry>,
    next_id: AtomicU64,
}

/// Handle returned by [`EventDispatcher::subscribe`].
pub struct Subscription {
    kind: EventKind,
    id: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn unsubscribe(self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        if let Some(mut handlers) = registry.get_mut(&self.kind) {
            handlers.retain(|(id, _)| *id != self.id);
        }
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&SfuEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription {
            kind,
            id,
            registry: Arc::downgrade(&self.handlers),
        }
    }

    /// Clears the handlers of one kind, or the whole registry when `kind` is `None`.
    pub fn unsubscribe_all(&self, kind: Option<EventKind>) {
        match kind {
            Some(kind) => {
                self.handlers.remove(&kind);
            }
            None => self.handlers.clear(),
        }
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map(|h| h.len()).unwrap_or(0)
    }

    pub fn dispatch(&self, event: &SfuEvent) {
        let kind = event.kind();
        // Snapshot first: handlers may subscribe or unsubscribe while running.
        let snapshot: Vec<EventHandler> = match self.handlers.get(&kind) {
            Some(handlers) => handlers.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => {
                trace!(?kind, "No handlers registered");
                return;
            }
        };

        for handler in snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(?kind, "Event handler failed: {e:#}"),
                Err(_) => error!(?kind, "Event handler panicked"),
            }
        }
    }
}
