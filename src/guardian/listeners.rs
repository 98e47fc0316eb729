// Managed event-listener registry
//
// Every listener the application attaches goes through this registry so
// the native detach always happens in lockstep with bookkeeping. The
// registry enforces a hard cap (oldest evicted first) and a periodic
// staleness sweep, both of which run the detach hook before dropping the
// entry.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, warn};

/// Registry entry cap before oldest-first eviction.
pub const DEFAULT_MAX_LISTENERS: usize = 200;

/// Entries older than this are removed by the periodic sweep.
pub const DEFAULT_STALE_AGE_MS: u64 = 5 * 60 * 1000;

type DetachFn = Box<dyn FnOnce() + Send>;

struct ManagedListener {
    target: String,
    event: String,
    category: String,
    created_at_ms: u64,
    detach: Option<DetachFn>,
}

pub struct ListenerRegistry {
    max_listeners: usize,
    stale_age_ms: u64,
    // BTreeMap keyed by monotonically increasing id keeps entries in
    // attachment order, which is the eviction order.
    entries: BTreeMap<u64, ManagedListener>,
    next_id: u64,
}

impl ListenerRegistry {
    pub fn new(max_listeners: usize, stale_age_ms: u64) -> Self {
        Self {
            max_listeners,
            stale_age_ms,
            entries: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Record a listener along with the hook that detaches it natively.
    /// Returns the entry id; prefer [`SharedListenerRegistry::add`] which
    /// returns a removable handle.
    pub fn add<F>(
        &mut self,
        target: &str,
        event: &str,
        category: &str,
        detach: F,
        now_ms: u64,
    ) -> u64
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(
            id,
            ManagedListener {
                target: target.to_string(),
                event: event.to_string(),
                category: category.to_string(),
                created_at_ms: now_ms,
                detach: Some(Box::new(detach)),
            },
        );

        while self.entries.len() > self.max_listeners {
            if let Some((&oldest, _)) = self.entries.iter().next() {
                warn!(id = oldest, "listener cap exceeded; evicting oldest");
                self.remove(oldest);
            }
        }
        id
    }

    /// Detach and forget an entry. Unknown ids are a no-op, which makes
    /// repeated removal safe.
    pub fn remove(&mut self, id: u64) -> bool {
        match self.entries.remove(&id) {
            Some(mut entry) => {
                if let Some(detach) = entry.detach.take() {
                    detach();
                }
                debug!(
                    id,
                    target = %entry.target,
                    event = %entry.event,
                    "listener detached"
                );
                true
            }
            None => false,
        }
    }

    /// Remove every entry older than the staleness age. Returns how many
    /// were removed.
    pub fn sweep_stale(&mut self, now_ms: u64) -> usize {
        let stale: Vec<u64> = self
            .entries
            .iter()
            .filter(|(_, e)| now_ms.saturating_sub(e.created_at_ms) > self.stale_age_ms)
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            self.remove(*id);
        }
        if !stale.is_empty() {
            debug!(count = stale.len(), "stale listeners swept");
        }
        stale.len()
    }

    /// Detach everything; used at shutdown.
    pub fn clear(&mut self) {
        let ids: Vec<u64> = self.entries.keys().copied().collect();
        for id in ids {
            self.remove(id);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Count of entries under a given category.
    pub fn category_count(&self, category: &str) -> usize {
        self.entries
            .values()
            .filter(|e| e.category == category)
            .count()
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LISTENERS, DEFAULT_STALE_AGE_MS)
    }
}

/// Shared registry handing out removable handles.
#[derive(Clone)]
pub struct SharedListenerRegistry {
    inner: Arc<Mutex<ListenerRegistry>>,
}

impl SharedListenerRegistry {
    pub fn new(registry: ListenerRegistry) -> Self {
        Self {
            inner: Arc::new(Mutex::new(registry)),
        }
    }

    pub fn add<F>(
        &self,
        target: &str,
        event: &str,
        category: &str,
        detach: F,
        now_ms: u64,
    ) -> ListenerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let id = match self.inner.lock() {
            Ok(mut registry) => registry.add(target, event, category, detach, now_ms),
            Err(_) => {
                warn!("listener registry poisoned; listener not tracked");
                0
            }
        };
        ListenerHandle {
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    pub fn sweep_stale(&self, now_ms: u64) -> usize {
        self.inner
            .lock()
            .map(|mut r| r.sweep_stale(now_ms))
            .unwrap_or(0)
    }

    pub fn clear(&self) {
        if let Ok(mut registry) = self.inner.lock() {
            registry.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SharedListenerRegistry {
    fn default() -> Self {
        Self::new(ListenerRegistry::default())
    }
}

/// Handle for one managed listener. `remove()` is idempotent; it is also
/// safe to call after the registry itself is gone.
pub struct ListenerHandle {
    id: u64,
    registry: Weak<Mutex<ListenerRegistry>>,
}

impl ListenerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn remove(&self) {
        if let Some(registry) = self.registry.upgrade() {
            if let Ok(mut registry) = registry.lock() {
                registry.remove(self.id);
            }
        }
    }
}
