// GPU resource tracking
//
// An explicit instrumentation facade over the host's GPU factory: callers
// create textures/programs/buffers through the facade, which records
// creation timestamps per handle. The periodic check compares live counts
// against soft limits and only warns; the tracker never destroys GPU
// objects it does not own. Wrapping is guarded so a factory is
// instrumented at most once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::host::GpuFactory;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuSoftLimits {
    pub max_textures: usize,
    pub max_programs: usize,
}

impl Default for GpuSoftLimits {
    fn default() -> Self {
        Self {
            max_textures: 64,
            max_programs: 32,
        }
    }
}

/// Live-count snapshot for status reporting.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GpuResourceCounts {
    pub textures: usize,
    pub programs: usize,
    pub buffers: usize,
}

#[derive(Default)]
struct TrackerState {
    textures: HashMap<u64, u64>,
    programs: HashMap<u64, u64>,
    buffers: HashMap<u64, u64>,
}

/// Instrumented GPU factory. Implements [`GpuFactory`] itself so it can
/// be passed anywhere the raw factory was.
pub struct TrackedGpu {
    inner: Arc<dyn GpuFactory>,
    state: Mutex<TrackerState>,
    /// Set when the wrapped factory was already instrumented; the outer
    /// layer then delegates without counting, so double-wrapping never
    /// double-counts.
    passthrough: bool,
    now_ms: Box<dyn Fn() -> u64 + Send + Sync>,
}

impl TrackedGpu {
    /// Wrap a factory. Wrapping an already-tracked factory yields a
    /// passthrough layer, keeping instrumentation single.
    pub fn wrap<F>(inner: Arc<dyn GpuFactory>, now_ms: F) -> Arc<Self>
    where
        F: Fn() -> u64 + Send + Sync + 'static,
    {
        let passthrough = inner.is_instrumented();
        if passthrough {
            debug!("gpu factory already instrumented; outer wrap is passthrough");
        }
        Arc::new(Self {
            inner,
            state: Mutex::new(TrackerState::default()),
            passthrough,
            now_ms: Box::new(now_ms),
        })
    }

    fn record(&self, map: fn(&mut TrackerState) -> &mut HashMap<u64, u64>, id: u64) {
        if self.passthrough {
            return;
        }
        if let Ok(mut state) = self.state.lock() {
            map(&mut state).insert(id, (self.now_ms)());
        }
    }

    /// Renderer disposed a texture it created through the facade.
    pub fn release_texture(&self, id: u64) {
        if let Ok(mut state) = self.state.lock() {
            state.textures.remove(&id);
        }
    }

    pub fn release_program(&self, id: u64) {
        if let Ok(mut state) = self.state.lock() {
            state.programs.remove(&id);
        }
    }

    pub fn release_buffer(&self, id: u64) {
        if let Ok(mut state) = self.state.lock() {
            state.buffers.remove(&id);
        }
    }

    pub fn counts(&self) -> GpuResourceCounts {
        self.state
            .lock()
            .map(|state| GpuResourceCounts {
                textures: state.textures.len(),
                programs: state.programs.len(),
                buffers: state.buffers.len(),
            })
            .unwrap_or_default()
    }

    /// Warn-only soft limit check; returns the live counts.
    pub fn check_limits(&self, limits: &GpuSoftLimits) -> GpuResourceCounts {
        let counts = self.counts();
        if counts.textures > limits.max_textures {
            warn!(
                live = counts.textures,
                limit = limits.max_textures,
                "texture count over soft limit"
            );
        }
        if counts.programs > limits.max_programs {
            warn!(
                live = counts.programs,
                limit = limits.max_programs,
                "program count over soft limit"
            );
        }
        counts
    }

    /// Drop all bookkeeping, e.g. after a context loss invalidated every
    /// handle.
    pub fn reset(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.textures.clear();
            state.programs.clear();
            state.buffers.clear();
        }
    }
}

impl GpuFactory for TrackedGpu {
    fn create_texture(&self) -> u64 {
        let id = self.inner.create_texture();
        self.record(|s| &mut s.textures, id);
        id
    }

    fn create_program(&self) -> u64 {
        let id = self.inner.create_program();
        self.record(|s| &mut s.programs, id);
        id
    }

    fn create_buffer(&self) -> u64 {
        let id = self.inner.create_buffer();
        self.record(|s| &mut s.buffers, id);
        id
    }

    fn is_instrumented(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeGpu;

    fn tracked() -> Arc<TrackedGpu> {
        TrackedGpu::wrap(Arc::new(FakeGpu::new()), || 0)
    }

    #[test]
    fn test_creation_is_counted() {
        let gpu = tracked();
        let t1 = gpu.create_texture();
        let _t2 = gpu.create_texture();
        let _p = gpu.create_program();
        let counts = gpu.counts();
        assert_eq!(counts.textures, 2);
        assert_eq!(counts.programs, 1);
        assert_eq!(counts.buffers, 0);

        gpu.release_texture(t1);
        assert_eq!(gpu.counts().textures, 1);
    }

    #[test]
    fn test_double_wrap_does_not_double_count() {
        let once = tracked();
        let twice = TrackedGpu::wrap(Arc::clone(&once) as Arc<dyn GpuFactory>, || 0);

        twice.create_texture();
        assert_eq!(once.counts().textures, 1, "inner layer counts");
        assert_eq!(twice.counts().textures, 0, "outer layer is passthrough");
    }

    #[test]
    fn test_soft_limit_check_never_destroys() {
        let gpu = tracked();
        for _ in 0..70 {
            gpu.create_texture();
        }
        let counts = gpu.check_limits(&GpuSoftLimits::default());
        assert_eq!(counts.textures, 70, "check only warns, objects survive");
    }

    #[test]
    fn test_reset_clears_bookkeeping() {
        let gpu = tracked();
        gpu.create_buffer();
        gpu.create_program();
        gpu.reset();
        let counts = gpu.counts();
        assert_eq!(counts.buffers + counts.programs, 0);
    }
}
