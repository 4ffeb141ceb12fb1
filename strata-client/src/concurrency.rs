use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

struct TagSlot {
    lock: Arc<Mutex<()>>,
    pending: usize,
}

/// Async mutex keyed by tag.
///
/// Work sharing a tag runs one at a time in submission order; different tags run in parallel.
#[derive(Default)]
pub struct TagLock {
    slots: DashMap<String, TagSlot>,
}

impl TagLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run<F, T>(&self, tag: &str, work: F) -> T
    where
        F: Future<Output = T>,
    {
        let lock = {
            let mut slot = self.slots.entry(tag.to_string()).or_insert_with(|| TagSlot {
                lock: Arc::new(Mutex::new(())),
                pending: 0,
            });
            slot.pending += 1;
            Arc::clone(&slot.lock)
        };

        let _pending = PendingGuard { owner: self, tag };
        let _guard = lock.lock().await;
        work.await
    }

    /// Whether any work is queued or running under `tag`.
    pub fn has_pending(&self, tag: &str) -> bool {
        self.slots.get(tag).is_some_and(|slot| slot.pending > 0)
    }
}

struct PendingGuard<'a> {
    owner: &'a TagLock,
    tag: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.owner.slots.remove_if_mut(self.tag, |_, slot| {
            slot.pending = slot.pending.saturating_sub(1);
            slot.pending == 0
        });
    }
}

/// Marks a state machine as "in transition" for as long as it is held.
///
/// A second transition is refused while one is active, not queued.
pub struct TransitionGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> TransitionGuard<'a> {
    pub fn try_begin(flag: &'a AtomicBool) -> Option<Self> {
        (!flag.swap(true, Ordering::SeqCst)).then_some(Self { flag })
    }
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
