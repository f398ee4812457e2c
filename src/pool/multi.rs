//! Growable composition of fixed-capacity pools
//!
//! A [`MultiPool`] presents an append-only sequence of
//! [`SinglePool`]s as one logical allocator. Allocation probes the
//! pools in order and appends a larger pool when none fits, so it
//! never fails; deallocation routes to the owning pool through an
//! address map. Existing pools never move or shrink, which keeps
//! every returned address valid until its matching deallocation.

use std::collections::HashMap;
use std::fmt;
use std::ptr::NonNull;

use crate::error::PoolResult;

use super::config::PoolConfig;
use super::single::SinglePool;
use super::stats::AllocationStats;
use super::{required_chunks, CHUNK_SIZE};

/// Growing sequence of fixed-capacity pools behind one allocator surface
///
/// Growth policy: when no existing pool can satisfy a request for
/// `k` chunks, a new pool of `growth_factor * M + k` chunks is
/// appended, where `M` is the largest existing pool's capacity. Total
/// capacity therefore grows geometrically, and any single request,
/// however large, fits the newly appended pool.
///
/// The routing map stores pool *indices* into an append-only `Vec`,
/// re-resolved on every lookup; each pool's buffer is a separate heap
/// allocation, so appending pools never invalidates addresses handed
/// out earlier.
pub struct MultiPool {
    /// Owned pools in append order; never reordered or shrunk
    pools: Vec<SinglePool>,
    /// Allocated address -> index of the owning pool
    routing: HashMap<usize, usize>,
    /// Growth factor from the construction-time config
    growth_factor: usize,
    /// Allocation statistics for tuning
    stats: AllocationStats,
}

impl MultiPool {
    /// Create a pool group with one pool of `initial_chunks` chunks
    ///
    /// # Errors
    /// [`PoolError::ZeroCapacity`](crate::PoolError::ZeroCapacity) if
    /// `initial_chunks` is zero.
    pub fn new(initial_chunks: usize) -> PoolResult<Self> {
        Self::with_config(PoolConfig::new().with_initial_chunks(initial_chunks))
    }

    /// Create a pool group from a full configuration
    pub fn with_config(config: PoolConfig) -> PoolResult<Self> {
        config.validate()?;
        let pools = vec![SinglePool::new(config.initial_chunks)?];
        Ok(MultiPool {
            pools,
            routing: HashMap::new(),
            growth_factor: config.growth_factor,
            stats: AllocationStats::default(),
        })
    }

    /// Allocate `n_bytes` bytes, rounded up to whole chunks
    ///
    /// Never fails: if no existing pool has a sufficient contiguous
    /// free run, a larger pool is appended first. Running out of host
    /// memory while appending aborts the process; there is no
    /// partial-state recovery.
    pub fn allocate(&mut self, n_bytes: usize) -> NonNull<u8> {
        let mut max_chunks = 0;
        for (idx, pool) in self.pools.iter_mut().enumerate() {
            max_chunks = max_chunks.max(pool.num_chunks());
            if let Some(ptr) = pool.allocate(n_bytes) {
                self.record_allocation(ptr, idx);
                return ptr;
            }
        }

        let new_capacity = self.growth_factor * max_chunks + required_chunks(n_bytes);
        tracing::info!(
            "appending pool: {} chunks (largest existing pool {} chunks, request {} bytes)",
            new_capacity,
            max_chunks,
            n_bytes
        );

        let mut pool = SinglePool::new(new_capacity).expect("grown pool capacity is nonzero");
        let ptr = pool
            .allocate(n_bytes)
            .expect("freshly appended pool satisfies the request");
        self.pools.push(pool);
        self.stats.grow_count += 1;
        self.record_allocation(ptr, self.pools.len() - 1);
        ptr
    }

    /// Return an allocation to its owning pool
    ///
    /// # Panics
    /// If `ptr` was not produced by this pool group or was already
    /// freed. No recovery is possible.
    pub fn deallocate(&mut self, ptr: NonNull<u8>) {
        let addr = ptr.as_ptr() as usize;
        let idx = match self.routing.remove(&addr) {
            Some(idx) => idx,
            None => panic!(
                "deallocate of unknown address {addr:#x}: double free or pointer not from this pool"
            ),
        };
        self.pools[idx].deallocate(ptr);
        self.stats.total_deallocations += 1;
        self.stats.current_allocations = self.stats.current_allocations.saturating_sub(1);
        debug_assert_eq!(self.routing.len(), self.pool_allocation_sum());
        tracing::trace!("freed {addr:#x} from pool {idx}");
    }

    /// Number of live allocations across all pools
    ///
    /// Equals the routing-map size; by construction this also equals
    /// the sum of `num_allocations()` over the owned pools.
    pub fn num_allocations(&self) -> usize {
        debug_assert_eq!(self.routing.len(), self.pool_allocation_sum());
        self.routing.len()
    }

    /// Total chunks held by live allocations across all pools
    pub fn num_allocated_chunks(&self) -> usize {
        self.pools.iter().map(|p| p.num_allocated_chunks()).sum()
    }

    /// Total free chunks across all pools
    pub fn num_free_chunks(&self) -> usize {
        self.pools.iter().map(|p| p.num_free_chunks()).sum()
    }

    /// Total capacity in chunks across all pools
    pub fn num_chunks(&self) -> usize {
        self.pools.iter().map(|p| p.num_chunks()).sum()
    }

    /// Total number of disjoint free ranges across all pools
    pub fn num_free_fragments(&self) -> usize {
        self.pools.iter().map(|p| p.num_free_fragments()).sum()
    }

    /// Number of owned pools
    pub fn num_pools(&self) -> usize {
        self.pools.len()
    }

    /// Size of one chunk in bytes
    pub fn chunk_size(&self) -> usize {
        CHUNK_SIZE
    }

    /// Get allocation statistics
    pub fn stats(&self) -> &AllocationStats {
        &self.stats
    }

    /// Reset allocation statistics
    pub fn reset_stats(&mut self) {
        self.stats = AllocationStats::default();
    }

    /// Access the owned pools in append order
    pub fn pools(&self) -> &[SinglePool] {
        &self.pools
    }

    fn record_allocation(&mut self, ptr: NonNull<u8>, idx: usize) {
        self.routing.insert(ptr.as_ptr() as usize, idx);
        self.stats.total_allocations += 1;
        self.stats.current_allocations += 1;
        self.stats.peak_allocations = self
            .stats
            .peak_allocations
            .max(self.stats.current_allocations);
        debug_assert_eq!(self.routing.len(), self.pool_allocation_sum());
    }

    fn pool_allocation_sum(&self) -> usize {
        self.pools.iter().map(|p| p.num_allocations()).sum()
    }
}

impl fmt::Debug for MultiPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiPool")
            .field("pools", &self.pools.len())
            .field("allocations", &self.routing.len())
            .field("growth_factor", &self.growth_factor)
            .finish()
    }
}

/// Renders each owned pool in order, separated by a single space.
impl fmt::Display for MultiPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, pool) in self.pools.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{pool}")?;
        }
        Ok(())
    }
}
