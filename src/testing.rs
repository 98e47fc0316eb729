//! Fake hosts for tests and trace replay.
//!
//! These implement the host seams with deterministic in-memory state so
//! the whole engine can run without a browser, a GPU, or real time. They
//! are compiled into the library because the diagnostic CLI replays
//! traces through them.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::host::{DomHost, GcHinter, GpuFactory, HeapStats, HostActions};

/// In-memory document tree: counts of regular, temp-marked, protected,
/// and detached nodes.
pub struct FakeDom {
    regular: AtomicUsize,
    temporary: AtomicUsize,
    detached: AtomicUsize,
    protected: Mutex<Vec<String>>,
    protected_removed: AtomicUsize,
}

impl FakeDom {
    pub fn new(base_nodes: usize) -> Self {
        Self {
            regular: AtomicUsize::new(base_nodes),
            temporary: AtomicUsize::new(0),
            detached: AtomicUsize::new(0),
            protected: Mutex::new(Vec::new()),
            protected_removed: AtomicUsize::new(0),
        }
    }

    /// Add nodes; temporary nodes carry overlay markers and are eligible
    /// for the internal sweep.
    pub fn add_nodes(&self, count: usize, temporary: bool) {
        if temporary {
            self.temporary.fetch_add(count, Ordering::SeqCst);
        } else {
            self.regular.fetch_add(count, Ordering::SeqCst);
        }
    }

    /// Add one overlay node matching a critical selector.
    pub fn add_protected_node(&self, selector: &str) {
        if let Ok(mut protected) = self.protected.lock() {
            protected.push(selector.to_string());
        }
    }

    /// Mark nodes as detached from the live tree.
    pub fn detach_nodes(&self, count: usize) {
        self.detached.fetch_add(count, Ordering::SeqCst);
    }

    /// How many protected-selector nodes a sweep removed. Must stay 0
    /// when the denylist covers them.
    pub fn protected_removed(&self) -> usize {
        self.protected_removed.load(Ordering::SeqCst)
    }
}

impl DomHost for FakeDom {
    fn node_count(&self) -> usize {
        let protected = self.protected.lock().map(|p| p.len()).unwrap_or(0);
        self.regular.load(Ordering::SeqCst) + self.temporary.load(Ordering::SeqCst) + protected
    }

    fn remove_temporaries(&self, protected: &[&str]) -> usize {
        let mut removed = self.temporary.swap(0, Ordering::SeqCst);
        if let Ok(mut nodes) = self.protected.lock() {
            nodes.retain(|selector| {
                if protected.iter().any(|p| p == selector) {
                    true
                } else {
                    self.protected_removed.fetch_add(1, Ordering::SeqCst);
                    removed += 1;
                    false
                }
            });
        }
        removed
    }

    fn remove_detached(&self) -> usize {
        self.detached.swap(0, Ordering::SeqCst)
    }
}

/// GPU factory handing out monotonically increasing handles.
#[derive(Default)]
pub struct FakeGpu {
    next_id: AtomicU64,
}

impl FakeGpu {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GpuFactory for FakeGpu {
    fn create_texture(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn create_program(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn create_buffer(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Page host with a togglable visibility flag and a reload counter.
pub struct FakeHost {
    visible: AtomicBool,
    reloads: AtomicUsize,
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            visible: AtomicBool::new(true),
            reloads: AtomicUsize::new(0),
        }
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
    }

    pub fn reload_count(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }
}

impl Default for FakeHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostActions for FakeHost {
    fn is_page_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    fn request_reload(&self) {
        self.reloads.fetch_add(1, Ordering::SeqCst);
    }
}

/// Heap reporter with an adjustable used-bytes reading.
pub struct FakeHeap {
    used: AtomicU64,
    total: AtomicU64,
}

impl FakeHeap {
    pub fn new(used: u64, total: u64) -> Self {
        Self {
            used: AtomicU64::new(used),
            total: AtomicU64::new(total),
        }
    }

    pub fn set_used(&self, used: u64) {
        self.used.store(used, Ordering::SeqCst);
    }

    pub fn grow(&self, bytes: u64) {
        self.used.fetch_add(bytes, Ordering::SeqCst);
    }
}

impl HeapStats for FakeHeap {
    fn heap_bytes(&self) -> Option<(u64, u64)> {
        Some((self.used.load(Ordering::SeqCst), self.total.load(Ordering::SeqCst)))
    }
}

/// GC hinter that records hint requests and accepts or rejects them all.
pub struct FakeGcHinter {
    accept: bool,
    requests: AtomicUsize,
}

impl FakeGcHinter {
    pub fn accepting() -> Self {
        Self {
            accept: true,
            requests: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            accept: false,
            requests: AtomicUsize::new(0),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl GcHinter for FakeGcHinter {
    fn try_request_gc(&self) -> bool {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.accept
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_dom_counts() {
        let dom = FakeDom::new(100);
        dom.add_nodes(50, true);
        dom.add_protected_node(".logo");
        assert_eq!(dom.node_count(), 151);

        let removed = dom.remove_temporaries(&[".logo"]);
        assert_eq!(removed, 50);
        assert_eq!(dom.protected_removed(), 0);
        assert_eq!(dom.node_count(), 101, "protected node survives the sweep");
    }

    #[test]
    fn test_fake_dom_removes_unprotected_overlays() {
        let dom = FakeDom::new(10);
        dom.add_protected_node(".stray-overlay");
        let removed = dom.remove_temporaries(&[".logo"]);
        assert_eq!(removed, 1, "overlay not on the denylist is removable");
        assert_eq!(dom.protected_removed(), 1);
    }

    #[test]
    fn test_fake_host_visibility_and_reload() {
        let host = FakeHost::new();
        assert!(host.is_page_visible());
        host.set_visible(false);
        assert!(!host.is_page_visible());
        host.request_reload();
        assert_eq!(host.reload_count(), 1);
    }
}
