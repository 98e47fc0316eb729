//! Host abstraction seams.
//!
//! The governance engine never touches platform globals directly. Each
//! capability it needs from the embedding application (document tree,
//! GPU factory, page lifecycle, GC hinting) is a small trait the host
//! implements. Monitors treat a missing capability as "skip this check",
//! never as a hard failure.

/// Access to the host's document/scene tree for node accounting and
/// defensive cleanup.
///
/// Implementations must tolerate concurrent mutation by the host's own
/// renderers: a node reported by `node_count` may already be gone by the
/// time a sweep runs.
pub trait DomHost: Send + Sync {
    /// Total live node count.
    fn node_count(&self) -> usize;

    /// Remove elements carrying temporary/overlay markers, skipping any
    /// element matching one of the protected selectors. Returns the number
    /// of nodes actually removed.
    fn remove_temporaries(&self, protected: &[&str]) -> usize;

    /// Remove elements already detached from the live tree. Returns the
    /// number of nodes actually removed.
    fn remove_detached(&self) -> usize;
}

/// Optional delegated cleanup collaborator, preferred over the internal
/// sweep when wired. Returns the number of orphaned nodes it removed.
pub trait OrphanSweeper: Send + Sync {
    fn sweep_orphans(&self) -> usize;
}

/// GPU object factory the resource tracker wraps.
///
/// Returned ids are opaque host handles; the tracker only counts them and
/// never destroys objects it does not own.
pub trait GpuFactory: Send + Sync {
    fn create_texture(&self) -> u64;
    fn create_program(&self) -> u64;
    fn create_buffer(&self) -> u64;

    /// True when this factory is already an instrumentation layer; the
    /// tracker uses it to guarantee a factory is wrapped at most once.
    fn is_instrumented(&self) -> bool {
        false
    }
}

/// Page-level actions and visibility, used by the watchdog.
pub trait HostActions: Send + Sync {
    /// Whether the page/window is currently visible. Heartbeat stalls are
    /// only flagged while visible; a hidden page legitimately stops
    /// animation-frame callbacks.
    fn is_page_visible(&self) -> bool;

    /// Terminal recovery: full reload of the application. Called only
    /// after every softer recovery path has been exhausted.
    fn request_reload(&self);
}

/// Heap usage readings for drift detection. Hosts without memory
/// introspection return `None` and heap monitoring stays dormant.
pub trait HeapStats: Send + Sync {
    /// Current (used, total) heap bytes, if the host can report them.
    fn heap_bytes(&self) -> Option<(u64, u64)>;
}

/// Optional GC hint capability. Hosts that cannot trigger collection
/// return false and the caller moves on.
pub trait GcHinter: Send + Sync {
    fn try_request_gc(&self) -> bool;
}
