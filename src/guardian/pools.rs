// Object pools for hot-path allocations
//
// A small closed set of reusable allocation types, each pooled behind the
// same discipline: leases move objects from `available` to `in_use`, the
// two sets stay disjoint, and a pool at its in-use cap refuses to grow.
// Callers must handle a refusal by falling back to a plain allocation or
// deferring work. Periodic maintenance trims idle objects back to half
// the cap so a burst does not pin memory forever.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// A poolable allocation: cheap to create, resettable to a clean state.
pub trait PoolItem: Send {
    fn create() -> Self;
    fn reset(&mut self);
}

/// Fixed-capacity f32 scratch buffer (typed-array analog).
#[derive(Debug, Clone, PartialEq)]
pub struct FloatBuffer {
    pub data: Vec<f32>,
}

pub const FLOAT_BUFFER_LEN: usize = 1024;

impl PoolItem for FloatBuffer {
    fn create() -> Self {
        Self {
            data: vec![0.0; FLOAT_BUFFER_LEN],
        }
    }

    fn reset(&mut self) {
        self.data.fill(0.0);
    }
}

/// Growable scratch list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScratchVec {
    pub items: Vec<f64>,
}

impl PoolItem for ScratchVec {
    fn create() -> Self {
        Self::default()
    }

    fn reset(&mut self) {
        self.items.clear();
    }
}

/// Keyed scratch storage (plain-object analog).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScratchMap {
    pub entries: HashMap<String, f64>,
}

impl PoolItem for ScratchMap {
    fn create() -> Self {
        Self::default()
    }

    fn reset(&mut self) {
        self.entries.clear();
    }
}

/// 3-component vector, reset to zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec3(pub [f32; 3]);

impl PoolItem for Vec3 {
    fn create() -> Self {
        Self([0.0; 3])
    }

    fn reset(&mut self) {
        self.0 = [0.0; 3];
    }
}

/// Column-major 4x4 matrix, reset to identity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mat4(pub [f32; 16]);

pub const MAT4_IDENTITY: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

impl PoolItem for Mat4 {
    fn create() -> Self {
        Self(MAT4_IDENTITY)
    }

    fn reset(&mut self) {
        self.0 = MAT4_IDENTITY;
    }
}

/// An object checked out of a pool. Ownership returns via
/// [`ObjectPool::release`].
#[derive(Debug)]
pub struct Lease<T: PoolItem> {
    id: u64,
    pub value: T,
}

impl<T: PoolItem> Lease<T> {
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Counters for one pool.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PoolStats {
    pub created: u64,
    pub reused: u64,
    pub available: usize,
    pub in_use: usize,
}

pub struct ObjectPool<T: PoolItem> {
    max_size: usize,
    available: Vec<T>,
    in_use: HashSet<u64>,
    next_lease_id: u64,
    created: u64,
    reused: u64,
}

impl<T: PoolItem> ObjectPool<T> {
    pub fn new(max_size: usize) -> Self {
        assert!(max_size > 0, "max_size must be greater than 0");
        Self {
            max_size,
            available: Vec::new(),
            in_use: HashSet::new(),
            next_lease_id: 1,
            created: 0,
            reused: 0,
        }
    }

    /// Check an object out. Returns None once the in-use cap is reached;
    /// the pool never grows past it.
    pub fn get(&mut self) -> Option<Lease<T>> {
        let value = if let Some(value) = self.available.pop() {
            self.reused += 1;
            value
        } else if self.in_use.len() < self.max_size {
            self.created += 1;
            T::create()
        } else {
            return None;
        };

        let id = self.next_lease_id;
        self.next_lease_id += 1;
        self.in_use.insert(id);
        Some(Lease { id, value })
    }

    /// Return an object to the pool, resetting its state. A lease that
    /// did not come from this pool is dropped on the floor.
    pub fn release(&mut self, mut lease: Lease<T>) {
        if !self.in_use.remove(&lease.id) {
            debug!(lease_id = lease.id, "released lease unknown to pool; dropped");
            return;
        }
        lease.value.reset();
        self.available.push(lease.value);
    }

    /// Trim idle objects back to half the cap.
    pub fn maintain(&mut self) {
        let keep = self.max_size / 2;
        if self.available.len() > keep {
            self.available.truncate(keep);
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.created,
            reused: self.reused,
            available: self.available.len(),
            in_use: self.in_use.len(),
        }
    }

    pub fn in_use_count(&self) -> usize {
        self.in_use.len()
    }

    pub fn available_count(&self) -> usize {
        self.available.len()
    }
}

/// One pool per supported allocation type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolSetStats {
    pub float_buffers: PoolStats,
    pub scratch_vecs: PoolStats,
    pub scratch_maps: PoolStats,
    pub vec3: PoolStats,
    pub mat4: PoolStats,
}

pub struct PoolSet {
    pub float_buffers: ObjectPool<FloatBuffer>,
    pub scratch_vecs: ObjectPool<ScratchVec>,
    pub scratch_maps: ObjectPool<ScratchMap>,
    pub vec3: ObjectPool<Vec3>,
    pub mat4: ObjectPool<Mat4>,
}

impl PoolSet {
    pub fn new(max_per_type: usize) -> Self {
        Self {
            float_buffers: ObjectPool::new(max_per_type),
            scratch_vecs: ObjectPool::new(max_per_type),
            scratch_maps: ObjectPool::new(max_per_type),
            vec3: ObjectPool::new(max_per_type),
            mat4: ObjectPool::new(max_per_type),
        }
    }

    /// Periodic maintenance across every pool.
    pub fn maintain(&mut self) {
        self.float_buffers.maintain();
        self.scratch_vecs.maintain();
        self.scratch_maps.maintain();
        self.vec3.maintain();
        self.mat4.maintain();
    }

    pub fn stats(&self) -> PoolSetStats {
        PoolSetStats {
            float_buffers: self.float_buffers.stats(),
            scratch_vecs: self.scratch_vecs.stats(),
            scratch_maps: self.scratch_maps.stats(),
            vec3: self.vec3.stats(),
            mat4: self.mat4.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_release_round_trip() {
        let mut pool: ObjectPool<Vec3> = ObjectPool::new(4);
        let mut lease = pool.get().expect("pool has room");
        lease.value.0 = [1.0, 2.0, 3.0];
        assert_eq!(pool.in_use_count(), 1);
        assert_eq!(pool.available_count(), 0);

        pool.release(lease);
        assert_eq!(pool.in_use_count(), 0);
        assert_eq!(pool.available_count(), 1);

        // The returned object was reset and gets reused.
        let lease = pool.get().expect("reuse");
        assert_eq!(lease.value.0, [0.0; 3], "release must reset state");
        assert_eq!(pool.stats().reused, 1);
    }

    #[test]
    fn test_cap_refuses_growth() {
        let mut pool: ObjectPool<ScratchVec> = ObjectPool::new(2);
        let a = pool.get().expect("first");
        let _b = pool.get().expect("second");
        assert!(pool.get().is_none(), "at cap, get() must refuse");

        pool.release(a);
        assert!(pool.get().is_some(), "room again after release");
    }

    #[test]
    fn test_disjointness_invariant() {
        let mut pool: ObjectPool<ScratchMap> = ObjectPool::new(8);
        let mut leases = Vec::new();
        for _ in 0..5 {
            leases.push(pool.get().expect("room"));
        }
        let stats = pool.stats();
        assert_eq!(stats.in_use + stats.available, 5);
        assert_eq!(stats.available, 0);

        for lease in leases.drain(..3) {
            pool.release(lease);
        }
        let stats = pool.stats();
        assert_eq!(stats.in_use, 2);
        assert_eq!(stats.available, 3);
        // Every object is in exactly one of the two sets.
        assert_eq!(stats.in_use + stats.available, 5);
    }

    #[test]
    fn test_reset_semantics_per_type() {
        let mut buffer = FloatBuffer::create();
        buffer.data[10] = 4.5;
        buffer.reset();
        assert!(buffer.data.iter().all(|v| *v == 0.0));
        assert_eq!(buffer.data.len(), FLOAT_BUFFER_LEN);

        let mut matrix = Mat4::create();
        matrix.0[3] = 7.0;
        matrix.reset();
        assert_eq!(matrix.0, MAT4_IDENTITY);

        let mut map = ScratchMap::create();
        map.entries.insert("x".to_string(), 1.0);
        map.reset();
        assert!(map.entries.is_empty());
    }

    #[test]
    fn test_maintenance_trims_idle_objects() {
        let mut pool: ObjectPool<Vec3> = ObjectPool::new(8);
        let leases: Vec<_> = (0..8).filter_map(|_| pool.get()).collect();
        for lease in leases {
            pool.release(lease);
        }
        assert_eq!(pool.available_count(), 8);
        pool.maintain();
        assert_eq!(pool.available_count(), 4, "trimmed to half the cap");
    }

    #[test]
    fn test_foreign_lease_is_ignored() {
        let mut pool_a: ObjectPool<Vec3> = ObjectPool::new(2);
        let mut pool_b: ObjectPool<Vec3> = ObjectPool::new(2);
        let lease = pool_a.get().expect("room");
        // Wrong pool: bookkeeping in b must not change.
        pool_b.release(lease);
        assert_eq!(pool_b.available_count(), 0);
        assert_eq!(pool_a.in_use_count(), 1);
    }
}
