//! Device memory bookkeeping.
//!
//! [`MemoryPool`] models a caching allocator: freed blocks stay reserved in a cache until
//! [`MemoryPool::empty_cache`] hands them back. The handoff protocol relies on that
//! distinction. Dropping the full weight mapping only moves its bytes into the cache; the
//! explicit reclamation request afterwards is what actually returns them, and what keeps
//! a second full copy from being resident next to the inference engine's working memory.
//!
//! ```rust
//! use rollout_sync::memory::MemoryPool;
//! use std::sync::Arc;
//!
//! let pool = Arc::new(MemoryPool::new());
//! let block = pool.allocate(1024).unwrap();
//! drop(block);
//! assert_eq!(pool.stats().allocated, 0);
//! assert_eq!(pool.stats().reserved, 1024);
//!
//! pool.empty_cache();
//! assert_eq!(pool.stats().reserved, 0);
//! ```

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

const GIB: f64 = (1u64 << 30) as f64;

/// A snapshot of pool usage, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryStats {
    /// Bytes held by live allocations.
    pub allocated: u64,
    /// Bytes held by live allocations plus the cache.
    pub reserved: u64,
    /// High-water mark of `reserved` since creation or the last reset.
    pub peak_reserved: u64,
    /// Upper bound on `reserved`, if any.
    pub capacity: Option<u64>,
}

#[derive(Debug, Default)]
struct PoolState {
    allocated: u64,
    cached: u64,
    peak_reserved: u64,
}

/// A caching allocator model shared by everything resident on one device.
#[derive(Debug, Default)]
pub struct MemoryPool {
    state: Mutex<PoolState>,
    capacity: Option<u64>,
}

impl MemoryPool {
    /// Creates an unbounded pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pool that refuses to reserve more than `capacity` bytes.
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            state: Mutex::new(PoolState::default()),
            capacity: Some(capacity),
        }
    }

    /// Allocates `bytes`, reusing cached bytes before reserving new ones.
    ///
    /// # Errors
    ///
    /// Returns `Error::ResourceExhausted` if reserving the remainder would exceed the
    /// pool's capacity. The cache is not emptied implicitly.
    pub fn allocate(self: &Arc<Self>, bytes: u64) -> Result<Allocation> {
        let mut state = self.state.lock();
        let reuse = bytes.min(state.cached);
        let grow = bytes - reuse;
        let reserved = state.allocated + state.cached;

        if let Some(capacity) = self.capacity {
            if reserved + grow > capacity {
                return Err(Error::ResourceExhausted {
                    requested: bytes,
                    available: capacity.saturating_sub(state.allocated),
                });
            }
        }

        state.cached -= reuse;
        state.allocated += bytes;
        state.peak_reserved = state.peak_reserved.max(state.allocated + state.cached);

        Ok(Allocation {
            pool: Arc::clone(self),
            bytes,
        })
    }

    /// Releases every cached byte. Returns how many bytes were released.
    pub fn empty_cache(&self) -> u64 {
        let mut state = self.state.lock();
        std::mem::take(&mut state.cached)
    }

    /// Resets the high-water mark to the current reserved size.
    pub fn reset_peak_stats(&self) {
        let mut state = self.state.lock();
        state.peak_reserved = state.allocated + state.cached;
    }

    pub fn stats(&self) -> MemoryStats {
        let state = self.state.lock();
        MemoryStats {
            allocated: state.allocated,
            reserved: state.allocated + state.cached,
            peak_reserved: state.peak_reserved,
            capacity: self.capacity,
        }
    }

    /// Emits the current usage as a `tracing` event tagged with `label`.
    pub fn log_memory_usage(&self, label: &str) {
        let stats = self.stats();
        debug!(
            allocated_gb = stats.allocated as f64 / GIB,
            reserved_gb = stats.reserved as f64 / GIB,
            peak_reserved_gb = stats.peak_reserved as f64 / GIB,
            "{}",
            label
        );
    }

    fn release(&self, bytes: u64) {
        let mut state = self.state.lock();
        state.allocated -= bytes;
        state.cached += bytes;
    }
}

/// A live block of pool memory. Dropping it moves its bytes into the pool's cache.
#[derive(Debug)]
pub struct Allocation {
    pool: Arc<MemoryPool>,
    bytes: u64,
}

impl Allocation {
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.pool.release(self.bytes);
    }
}
