//! Resource guardian: object pools, the managed listener registry, GPU
//! resource tracking, and scene lifecycle contracts.
//!
//! The guardian owns allocation bookkeeping, not policy: it caps and
//! recycles, warns on soft-limit breaches, and guarantees that every
//! disposal path (explicit, eviction, staleness, shutdown) detaches the
//! underlying resource exactly once.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub mod gpu;
pub mod listeners;
pub mod pools;
pub mod scenes;

pub use gpu::{GpuResourceCounts, GpuSoftLimits, TrackedGpu};
pub use listeners::{
    ListenerHandle, ListenerRegistry, SharedListenerRegistry, DEFAULT_MAX_LISTENERS,
    DEFAULT_STALE_AGE_MS,
};
pub use pools::{
    FloatBuffer, Lease, Mat4, ObjectPool, PoolItem, PoolSet, PoolSetStats, PoolStats, ScratchMap,
    ScratchVec, Vec3,
};
pub use scenes::SceneRegistry;

/// Aggregated guardian state for status reporting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardianStatus {
    pub pools: PoolSetStats,
    pub listeners: usize,
    pub gpu: GpuResourceCounts,
    pub scenes: usize,
    pub scene_dispose_failures: u64,
}

/// Owns every guarded resource registry and runs their periodic
/// maintenance from the shared ticker.
pub struct ResourceGuardian {
    pub pools: PoolSet,
    pub listeners: SharedListenerRegistry,
    pub gpu: Arc<TrackedGpu>,
    pub scenes: SceneRegistry,
    gpu_limits: GpuSoftLimits,
}

impl ResourceGuardian {
    pub fn new(
        max_pool_size: usize,
        listeners: SharedListenerRegistry,
        gpu: Arc<TrackedGpu>,
        gpu_limits: GpuSoftLimits,
    ) -> Self {
        Self {
            pools: PoolSet::new(max_pool_size),
            listeners,
            gpu,
            scenes: SceneRegistry::new(),
            gpu_limits,
        }
    }

    /// Periodic maintenance: trim idle pooled objects, sweep stale
    /// listeners, check GPU soft limits.
    pub fn maintain(&mut self, now_ms: u64) {
        self.pools.maintain();
        self.listeners.sweep_stale(now_ms);
        self.gpu.check_limits(&self.gpu_limits);
    }

    /// Emergency cleanup: everything maintain does, plus disposal of all
    /// registered scenes. Idempotent.
    pub fn emergency_cleanup(&mut self, now_ms: u64) -> usize {
        self.maintain(now_ms);
        self.scenes.dispose_all()
    }

    /// Shutdown: detach all listeners and dispose all scenes. Idempotent.
    pub fn teardown(&mut self) {
        self.listeners.clear();
        self.scenes.dispose_all();
    }

    pub fn status(&self) -> GuardianStatus {
        GuardianStatus {
            pools: self.pools.stats(),
            listeners: self.listeners.len(),
            gpu: self.gpu.counts(),
            scenes: self.scenes.len(),
            scene_dispose_failures: self.scenes.dispose_failures(),
        }
    }
}
