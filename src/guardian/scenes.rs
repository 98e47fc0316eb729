// Scene lifecycle registry
//
// Scenes register a disposer at creation time; disposal runs it exactly
// once inside a guarded call. Disposal errors are logged and counted,
// never propagated, and never block sibling disposals in the same pass.
// Disposing an unregistered id is a no-op.

use std::collections::HashMap;

use tracing::{debug, error};

use crate::error::{ErrorCode, GovernanceError};

type DisposeFn = Box<dyn FnOnce() -> Result<(), String> + Send>;

struct SceneRecord {
    created_at_ms: u64,
    last_accessed_ms: u64,
}

pub struct SceneRegistry {
    scenes: HashMap<String, SceneRecord>,
    disposers: HashMap<String, DisposeFn>,
    dispose_failures: u64,
}

impl SceneRegistry {
    pub fn new() -> Self {
        Self {
            scenes: HashMap::new(),
            disposers: HashMap::new(),
            dispose_failures: 0,
        }
    }

    /// Register a scene and its disposer. Re-registering an id disposes
    /// the previous incarnation first so its resources are not leaked.
    pub fn register_scene<F>(&mut self, id: &str, dispose: F, now_ms: u64)
    where
        F: FnOnce() -> Result<(), String> + Send + 'static,
    {
        if self.scenes.contains_key(id) {
            debug!(id, "scene re-registered; disposing previous incarnation");
            self.dispose_scene(id);
        }
        self.scenes.insert(
            id.to_string(),
            SceneRecord {
                created_at_ms: now_ms,
                last_accessed_ms: now_ms,
            },
        );
        self.disposers.insert(id.to_string(), Box::new(dispose));
    }

    /// Mark a scene as recently used.
    pub fn touch(&mut self, id: &str, now_ms: u64) {
        if let Some(record) = self.scenes.get_mut(id) {
            record.last_accessed_ms = now_ms;
        }
    }

    /// Invoke the disposer exactly once and drop all bookkeeping.
    /// Unknown ids return false without error.
    pub fn dispose_scene(&mut self, id: &str) -> bool {
        let disposer = match self.disposers.remove(id) {
            Some(d) => d,
            None => return false,
        };
        self.scenes.remove(id);

        if let Err(reason) = disposer() {
            self.dispose_failures += 1;
            let err = GovernanceError::RemediationFailed {
                target: id.to_string(),
                reason,
            };
            error!(code = err.code(), "{}", err.message());
        } else {
            debug!(id, "scene disposed");
        }
        true
    }

    /// Dispose every registered scene; failures do not stop the pass.
    pub fn dispose_all(&mut self) -> usize {
        let ids: Vec<String> = self.disposers.keys().cloned().collect();
        let mut disposed = 0;
        for id in ids {
            if self.dispose_scene(&id) {
                disposed += 1;
            }
        }
        disposed
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    pub fn dispose_failures(&self) -> u64 {
        self.dispose_failures
    }

    pub fn idle_ms(&self, id: &str, now_ms: u64) -> Option<u64> {
        self.scenes
            .get(id)
            .map(|r| now_ms.saturating_sub(r.last_accessed_ms))
    }

    pub fn age_ms(&self, id: &str, now_ms: u64) -> Option<u64> {
        self.scenes
            .get(id)
            .map(|r| now_ms.saturating_sub(r.created_at_ms))
    }
}

impl Default for SceneRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_dispose_runs_exactly_once() {
        let mut registry = SceneRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);
        registry.register_scene(
            "intro",
            move || {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            0,
        );

        assert!(registry.dispose_scene("intro"));
        assert!(!registry.dispose_scene("intro"), "second call is a no-op");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unknown_id_is_noop() {
        let mut registry = SceneRegistry::new();
        assert!(!registry.dispose_scene("never-registered"));
    }

    #[test]
    fn test_failing_disposer_is_contained() {
        let mut registry = SceneRegistry::new();
        registry.register_scene("bad", || Err("gpu handle already gone".to_string()), 0);
        registry.register_scene("good", || Ok(()), 0);

        let disposed = registry.dispose_all();
        assert_eq!(disposed, 2, "failure must not block the sibling disposal");
        assert_eq!(registry.dispose_failures(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reregister_disposes_previous() {
        let mut registry = SceneRegistry::new();
        let first_disposed = Arc::new(AtomicUsize::new(0));
        let clone = Arc::clone(&first_disposed);
        registry.register_scene(
            "main",
            move || {
                clone.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            0,
        );
        registry.register_scene("main", || Ok(()), 100);

        assert_eq!(first_disposed.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.age_ms("main", 150), Some(50));
    }

    #[test]
    fn test_touch_tracks_access() {
        let mut registry = SceneRegistry::new();
        registry.register_scene("hud", || Ok(()), 0);
        registry.touch("hud", 5_000);
        assert_eq!(registry.idle_ms("hud", 6_000), Some(1_000));
        registry.touch("missing", 5_000); // no-op
    }
}
