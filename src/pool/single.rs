//! Fixed-capacity chunk pool
//!
//! A [`SinglePool`] owns one contiguous buffer partitioned into
//! equally sized chunks and serves byte requests rounded up to whole
//! chunks. Free regions are tracked in two indices kept in lockstep:
//! a size-ordered set for best-fit lookup and a position-ordered map
//! for neighbor coalescing. Both queries are O(log n); a pool never
//! grows.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::ptr::NonNull;

use crate::error::{PoolError, PoolResult};

use super::range::ChunkRange;
use super::{required_chunks, CHUNK_SIZE};

/// One chunk of backing storage.
///
/// The alignment matches the chunk size, so every chunk boundary (and
/// therefore every returned address) is chunk-aligned.
#[repr(C, align(128))]
#[derive(Clone, Copy)]
struct ChunkCell([u8; CHUNK_SIZE]);

const _: () = assert!(std::mem::size_of::<ChunkCell>() == CHUNK_SIZE);
const _: () = assert!(std::mem::align_of::<ChunkCell>() == CHUNK_SIZE);

/// Fixed-capacity chunk allocator over one contiguous buffer
///
/// Allocation is best-fit: the smallest free region that satisfies
/// the request wins, with ties broken toward the lowest chunk index.
/// Deallocation merges the freed region with adjacent free neighbors
/// immediately, so no two free regions ever touch.
///
/// Addresses returned by [`allocate`](Self::allocate) stay valid
/// until the matching [`deallocate`](Self::deallocate) or until the
/// pool is dropped, whichever comes first. The backing buffer is a
/// separate heap allocation, so moving the `SinglePool` value itself
/// does not invalidate outstanding addresses.
///
/// # Thread Safety
///
/// Operations take `&mut self` and never block; the pool has no
/// internal synchronization. Callers wanting concurrent access must
/// serialize externally.
pub struct SinglePool {
    /// Base of the backing buffer; owned exclusively by this pool
    base: NonNull<ChunkCell>,
    /// Total capacity in chunks
    capacity_chunks: usize,
    /// Free ranges keyed by `(size, begin)` for best-fit lookup
    size_index: BTreeSet<(usize, usize)>,
    /// Free ranges keyed by `begin -> end` for neighbor lookup
    position_index: BTreeMap<usize, usize>,
    /// Live allocations keyed by returned address
    allocations: HashMap<usize, ChunkRange>,
}

// The pool exclusively owns its buffer, and `&self` methods only read
// plain index state.
unsafe impl Send for SinglePool {}
unsafe impl Sync for SinglePool {}

impl SinglePool {
    /// Create a pool of `capacity_chunks` chunks
    ///
    /// The buffer is zero-initialized. The free indices start with
    /// the single range covering the whole pool.
    ///
    /// # Errors
    /// [`PoolError::ZeroCapacity`] if `capacity_chunks` is zero.
    pub fn new(capacity_chunks: usize) -> PoolResult<Self> {
        if capacity_chunks == 0 {
            return Err(PoolError::ZeroCapacity);
        }

        let boxed = vec![ChunkCell([0; CHUNK_SIZE]); capacity_chunks].into_boxed_slice();
        let raw: *mut [ChunkCell] = Box::into_raw(boxed);
        // SAFETY: Box::into_raw never returns null.
        let base = unsafe { NonNull::new_unchecked(raw as *mut ChunkCell) };

        let mut size_index = BTreeSet::new();
        size_index.insert((capacity_chunks, 0));
        let mut position_index = BTreeMap::new();
        position_index.insert(0, capacity_chunks);

        tracing::debug!(
            "pool created: {} chunks ({} bytes)",
            capacity_chunks,
            capacity_chunks * CHUNK_SIZE
        );

        Ok(SinglePool {
            base,
            capacity_chunks,
            size_index,
            position_index,
            allocations: HashMap::new(),
        })
    }

    /// Allocate `n_bytes` bytes, rounded up to whole chunks
    ///
    /// A zero-byte request still consumes one chunk so that every
    /// allocation has a distinct address.
    ///
    /// # Returns
    /// * `Some(address)` - start of the allocated region
    /// * `None` - no free region of sufficient size exists
    pub fn allocate(&mut self, n_bytes: usize) -> Option<NonNull<u8>> {
        let k = required_chunks(n_bytes).max(1);

        // Smallest free range with size >= k; ties resolve to the
        // lowest begin through the (size, begin) key order.
        let &(size, begin) = self.size_index.range((k, 0)..).next()?;
        self.remove_free(begin, begin + size);

        if size > k {
            self.insert_free(ChunkRange::new(begin + k, begin + size));
        }

        let range = ChunkRange::new(begin, begin + k);
        let ptr = self.address_of(begin);
        self.allocations.insert(ptr.as_ptr() as usize, range);

        tracing::trace!("allocated {} bytes as {} chunks at {}", n_bytes, k, range);
        Some(ptr)
    }

    /// Return an allocation to the pool
    ///
    /// The freed region is merged with its free neighbors (either
    /// side, or both) in O(log n), so the free indices never hold two
    /// touching ranges.
    ///
    /// # Panics
    /// If `ptr` is not the start of a live allocation from this pool:
    /// a double free or a foreign pointer. No recovery is possible.
    pub fn deallocate(&mut self, ptr: NonNull<u8>) {
        let addr = ptr.as_ptr() as usize;
        let range = match self.allocations.remove(&addr) {
            Some(range) => range,
            None => panic!(
                "deallocate of unknown address {addr:#x}: double free or pointer not from this pool"
            ),
        };

        let mut begin = range.begin;
        let mut end = range.end;

        // Predecessor by position, if it touches the freed range.
        if let Some((&prev_begin, &prev_end)) = self.position_index.range(..begin).next_back() {
            if prev_end == begin {
                self.remove_free(prev_begin, prev_end);
                begin = prev_begin;
            }
        }

        // Successor by position, if the (possibly extended) range
        // touches it.
        if let Some((&next_begin, &next_end)) = self.position_index.range(end..).next() {
            if next_begin == end {
                self.remove_free(next_begin, next_end);
                end = next_end;
            }
        }

        self.insert_free(ChunkRange::new(begin, end));
        tracing::trace!("freed {} back to [{}, {})", range, begin, end);
    }

    /// Number of live allocations
    pub fn num_allocations(&self) -> usize {
        self.allocations.len()
    }

    /// Total chunks held by live allocations
    pub fn num_allocated_chunks(&self) -> usize {
        self.allocations.values().map(|r| r.len()).sum()
    }

    /// Total chunks in the free indices
    pub fn num_free_chunks(&self) -> usize {
        self.position_index.iter().map(|(b, e)| e - b).sum()
    }

    /// Total capacity in chunks
    pub fn num_chunks(&self) -> usize {
        self.capacity_chunks
    }

    /// Number of disjoint free ranges
    pub fn num_free_fragments(&self) -> usize {
        self.position_index.len()
    }

    /// Size of the largest contiguous free run, in chunks
    pub fn largest_free_run(&self) -> usize {
        self.size_index
            .iter()
            .next_back()
            .map(|&(size, _)| size)
            .unwrap_or(0)
    }

    /// Calculate fragmentation ratio (0.0 = none, 1.0 = fully fragmented)
    ///
    /// Fragmentation measures how scattered free memory is.
    /// - 0.0: Single contiguous free block (ideal)
    /// - Higher values: More scattered (may impact large allocations)
    pub fn fragmentation(&self) -> f32 {
        let free = self.num_free_chunks();
        if free == 0 {
            return 0.0;
        }
        1.0 - (self.largest_free_run() as f32 / free as f32)
    }

    /// Check whether an address lies inside this pool's buffer
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        let addr = ptr.as_ptr() as usize;
        let base = self.base.as_ptr() as usize;
        addr >= base && addr < base + self.capacity_chunks * CHUNK_SIZE
    }

    /// Address of the chunk at `begin`
    fn address_of(&self, begin: usize) -> NonNull<u8> {
        debug_assert!(begin < self.capacity_chunks);
        // SAFETY: begin is within the buffer, so the offset stays
        // in bounds of the same allocation.
        unsafe { NonNull::new_unchecked(self.base.as_ptr().cast::<u8>().add(begin * CHUNK_SIZE)) }
    }

    /// Insert a free range into both indices
    fn insert_free(&mut self, range: ChunkRange) {
        self.size_index.insert(range.size_key());
        self.position_index.insert(range.begin, range.end);
    }

    /// Remove the free range `[begin, end)` from both indices
    fn remove_free(&mut self, begin: usize, end: usize) {
        self.size_index.remove(&(end - begin, begin));
        self.position_index.remove(&begin);
    }
}

impl Drop for SinglePool {
    fn drop(&mut self) {
        // SAFETY: base came from Box::into_raw with this exact length
        // and is dropped exactly once.
        unsafe {
            drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
                self.base.as_ptr(),
                self.capacity_chunks,
            )));
        }
    }
}

impl fmt::Debug for SinglePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinglePool")
            .field("capacity_chunks", &self.capacity_chunks)
            .field("allocations", &self.allocations.len())
            .field("free_fragments", &self.position_index.len())
            .finish()
    }
}

/// Occupancy rendering: one character per chunk (`X` allocated, `-`
/// free), then the free ranges in best-fit order.
///
/// ```text
/// XX--
/// Free Set:  [2, 4)
/// ```
impl fmt::Display for SinglePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut occupancy = vec!['-'; self.capacity_chunks];
        for range in self.allocations.values() {
            for slot in &mut occupancy[range.begin..range.end] {
                *slot = 'X';
            }
        }
        for c in occupancy {
            write!(f, "{c}")?;
        }
        writeln!(f)?;

        write!(f, "Free Set:  ")?;
        for &(size, begin) in &self.size_index {
            write!(f, "[{}, {}) ", begin, begin + size)?;
        }
        writeln!(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The two free indices must describe the same set of ranges, and
    /// free and allocated ranges together must tile the pool exactly.
    fn assert_indices_consistent(pool: &SinglePool) {
        assert_eq!(pool.size_index.len(), pool.position_index.len());
        for (&begin, &end) in &pool.position_index {
            assert!(begin < end && end <= pool.capacity_chunks);
            assert!(
                pool.size_index.contains(&(end - begin, begin)),
                "free range [{begin}, {end}) missing from size index"
            );
        }
        assert_eq!(
            pool.num_free_chunks() + pool.num_allocated_chunks(),
            pool.num_chunks()
        );
    }

    #[test]
    fn test_new_pool_single_free_range() {
        let pool = SinglePool::new(4).unwrap();
        assert_eq!(pool.num_chunks(), 4);
        assert_eq!(pool.num_free_chunks(), 4);
        assert_eq!(pool.num_allocated_chunks(), 0);
        assert_eq!(pool.num_allocations(), 0);
        assert_eq!(pool.num_free_fragments(), 1);
        assert_indices_consistent(&pool);
    }

    #[test]
    fn test_zero_capacity_fails() {
        assert!(matches!(SinglePool::new(0), Err(PoolError::ZeroCapacity)));
    }

    #[test]
    fn test_small_allocation_takes_one_chunk() {
        let mut pool = SinglePool::new(4).unwrap();
        let ptr = pool.allocate(std::mem::size_of::<i32>()).unwrap();

        assert_eq!(pool.num_allocations(), 1);
        assert_eq!(pool.num_allocated_chunks(), 1);
        assert_eq!(pool.num_free_chunks(), 3);
        assert_eq!(pool.num_free_fragments(), 1);
        assert_eq!(pool.position_index.get(&1), Some(&4));
        assert_indices_consistent(&pool);

        pool.deallocate(ptr);
    }

    #[test]
    fn test_zero_byte_allocation_consumes_one_chunk() {
        let mut pool = SinglePool::new(2).unwrap();
        let a = pool.allocate(0).unwrap();
        let b = pool.allocate(0).unwrap();

        assert_ne!(a, b);
        assert_eq!(pool.num_allocated_chunks(), 2);
        pool.deallocate(a);
        pool.deallocate(b);
        assert_eq!(pool.num_free_fragments(), 1);
    }

    #[test]
    fn test_address_identity() {
        let mut pool = SinglePool::new(4).unwrap();
        let a = pool.allocate(CHUNK_SIZE).unwrap();
        let b = pool.allocate(CHUNK_SIZE).unwrap();

        let base = pool.base.as_ptr() as usize;
        assert_eq!(a.as_ptr() as usize, base);
        assert_eq!(b.as_ptr() as usize, base + CHUNK_SIZE);
        assert!(pool.contains(a) && pool.contains(b));
    }

    #[test]
    fn test_fill_then_empty() {
        let mut pool = SinglePool::new(4).unwrap();
        let ptr = pool.allocate(4 * CHUNK_SIZE).unwrap();

        assert_eq!(pool.num_allocated_chunks(), 4);
        assert_eq!(pool.num_free_chunks(), 0);
        assert_eq!(pool.num_free_fragments(), 0);
        assert!(pool.allocate(1).is_none());

        pool.deallocate(ptr);
        assert_eq!(pool.num_allocated_chunks(), 0);
        assert_eq!(pool.num_free_fragments(), 1);
        assert_eq!(pool.position_index.get(&0), Some(&4));
        assert_indices_consistent(&pool);
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let mut pool = SinglePool::new(2).unwrap();
        assert!(pool.allocate(3 * CHUNK_SIZE).is_none());
        let _keep = pool.allocate(2 * CHUNK_SIZE).unwrap();
        assert!(pool.allocate(1).is_none());
    }

    #[test]
    fn test_coalesce_left() {
        // "XXX-": free A then B; B must merge with the range A left.
        let mut pool = SinglePool::new(4).unwrap();
        let a = pool.allocate(CHUNK_SIZE).unwrap();
        let b = pool.allocate(CHUNK_SIZE).unwrap();
        let _c = pool.allocate(CHUNK_SIZE).unwrap();

        pool.deallocate(a);
        assert_eq!(pool.num_free_fragments(), 2);
        assert_eq!(pool.position_index.get(&0), Some(&1));
        assert_eq!(pool.position_index.get(&3), Some(&4));

        pool.deallocate(b);
        assert_eq!(pool.num_free_fragments(), 2);
        assert_eq!(pool.position_index.get(&0), Some(&2));
        assert_eq!(pool.position_index.get(&3), Some(&4));
        assert_indices_consistent(&pool);
    }

    #[test]
    fn test_coalesce_right() {
        // "XXXX": free D then C; C must merge with the range D left.
        let mut pool = SinglePool::new(4).unwrap();
        let _a = pool.allocate(CHUNK_SIZE).unwrap();
        let _b = pool.allocate(CHUNK_SIZE).unwrap();
        let c = pool.allocate(CHUNK_SIZE).unwrap();
        let d = pool.allocate(CHUNK_SIZE).unwrap();

        pool.deallocate(d);
        assert_eq!(pool.num_free_fragments(), 1);
        assert_eq!(pool.position_index.get(&3), Some(&4));

        pool.deallocate(c);
        assert_eq!(pool.num_free_fragments(), 1);
        assert_eq!(pool.position_index.get(&2), Some(&4));
        assert_indices_consistent(&pool);
    }

    #[test]
    fn test_coalesce_both_sides() {
        // "XXXX": free A, then C, then B; freeing B merges all three.
        let mut pool = SinglePool::new(4).unwrap();
        let a = pool.allocate(CHUNK_SIZE).unwrap();
        let b = pool.allocate(CHUNK_SIZE).unwrap();
        let c = pool.allocate(CHUNK_SIZE).unwrap();
        let _d = pool.allocate(CHUNK_SIZE).unwrap();

        pool.deallocate(a);
        pool.deallocate(c);
        assert_eq!(pool.num_free_fragments(), 2);

        pool.deallocate(b);
        assert_eq!(pool.num_free_fragments(), 1);
        assert_eq!(pool.position_index.get(&0), Some(&3));
        assert_indices_consistent(&pool);
    }

    #[test]
    fn test_best_fit_prefers_smallest_range() {
        // Free layout: [1, 2) (1 chunk) and [4, 8) (4 chunks). A
        // 1-chunk request must take the small hole, not split the
        // large one.
        let mut pool = SinglePool::new(8).unwrap();
        let _a = pool.allocate(CHUNK_SIZE).unwrap();
        let b = pool.allocate(CHUNK_SIZE).unwrap();
        let _c = pool.allocate(2 * CHUNK_SIZE).unwrap();
        pool.deallocate(b);

        let d = pool.allocate(CHUNK_SIZE).unwrap();
        let base = pool.base.as_ptr() as usize;
        assert_eq!(d.as_ptr() as usize, base + CHUNK_SIZE);
        assert_eq!(pool.num_free_fragments(), 1);
        assert_eq!(pool.position_index.get(&4), Some(&8));
    }

    #[test]
    fn test_best_fit_tie_breaks_to_lowest_begin() {
        // Three 1-chunk holes at [1, 2), [3, 4) and [5, 6); the
        // lowest begin wins.
        let mut pool = SinglePool::new(6).unwrap();
        let _a = pool.allocate(CHUNK_SIZE).unwrap();
        let b = pool.allocate(CHUNK_SIZE).unwrap();
        let _c = pool.allocate(CHUNK_SIZE).unwrap();
        let d = pool.allocate(CHUNK_SIZE).unwrap();
        let _e = pool.allocate(CHUNK_SIZE).unwrap();
        pool.deallocate(b);
        pool.deallocate(d);

        assert_eq!(pool.num_free_fragments(), 3);
        let f = pool.allocate(CHUNK_SIZE).unwrap();
        let base = pool.base.as_ptr() as usize;
        assert_eq!(f.as_ptr() as usize, base + CHUNK_SIZE);
    }

    #[test]
    fn test_remainder_reinserted_after_partial_take() {
        let mut pool = SinglePool::new(8).unwrap();
        let _a = pool.allocate(3 * CHUNK_SIZE).unwrap();

        assert_eq!(pool.num_free_fragments(), 1);
        assert_eq!(pool.position_index.get(&3), Some(&8));
        assert!(pool.size_index.contains(&(5, 3)));
        assert_indices_consistent(&pool);
    }

    #[test]
    #[should_panic(expected = "deallocate of unknown address")]
    fn test_double_free_panics() {
        let mut pool = SinglePool::new(4).unwrap();
        let ptr = pool.allocate(CHUNK_SIZE).unwrap();
        pool.deallocate(ptr);
        pool.deallocate(ptr);
    }

    #[test]
    #[should_panic(expected = "deallocate of unknown address")]
    fn test_foreign_pointer_panics() {
        let mut pool = SinglePool::new(4).unwrap();
        let _live = pool.allocate(CHUNK_SIZE).unwrap();
        let mut byte = 0u8;
        pool.deallocate(NonNull::from(&mut byte));
    }

    #[test]
    #[should_panic(expected = "deallocate of unknown address")]
    fn test_interior_pointer_panics() {
        // Only the exact start address of an allocation is accepted.
        let mut pool = SinglePool::new(4).unwrap();
        let ptr = pool.allocate(2 * CHUNK_SIZE).unwrap();
        let interior =
            unsafe { NonNull::new_unchecked(ptr.as_ptr().add(CHUNK_SIZE)) };
        pool.deallocate(interior);
    }

    #[test]
    fn test_fragmentation_metric() {
        let mut pool = SinglePool::new(8).unwrap();
        assert_eq!(pool.fragmentation(), 0.0);

        let a = pool.allocate(CHUNK_SIZE).unwrap();
        let _b = pool.allocate(CHUNK_SIZE).unwrap();
        let c = pool.allocate(CHUNK_SIZE).unwrap();
        pool.deallocate(a);
        pool.deallocate(c);

        // Freeing the third chunk merges with the tail: free ranges
        // are [0, 1) and [2, 8), so the largest run is 6 of 7 free.
        assert_eq!(pool.num_free_fragments(), 2);
        assert!(pool.fragmentation() > 0.0);
        assert_eq!(pool.largest_free_run(), 6);
    }

    #[test]
    fn test_display_occupancy_and_free_set() {
        let mut pool = SinglePool::new(4).unwrap();
        let _a = pool.allocate(CHUNK_SIZE).unwrap();
        assert_eq!(pool.to_string(), "X---\nFree Set:  [1, 4) \n");

        let mut full = SinglePool::new(2).unwrap();
        let _b = full.allocate(2 * CHUNK_SIZE).unwrap();
        assert_eq!(full.to_string(), "XX\nFree Set:  \n");
    }

    #[test]
    fn test_display_free_set_in_size_order() {
        // Holes of size 1 at [1, 2) and size 2 at [3, 5): the smaller
        // range lists first.
        let mut pool = SinglePool::new(6).unwrap();
        let _a = pool.allocate(CHUNK_SIZE).unwrap();
        let b = pool.allocate(CHUNK_SIZE).unwrap();
        let _c = pool.allocate(CHUNK_SIZE).unwrap();
        let d = pool.allocate(2 * CHUNK_SIZE).unwrap();
        let _e = pool.allocate(CHUNK_SIZE).unwrap();
        pool.deallocate(b);
        pool.deallocate(d);

        assert_eq!(pool.to_string(), "X-X--X\nFree Set:  [1, 2) [3, 5) \n");
    }

    #[test]
    fn test_reuse_after_free_round_trips() {
        let mut pool = SinglePool::new(4).unwrap();
        let a = pool.allocate(2 * CHUNK_SIZE).unwrap();
        let b = pool.allocate(2 * CHUNK_SIZE).unwrap();
        pool.deallocate(a);
        pool.deallocate(b);

        assert_eq!(pool.num_free_fragments(), 1);
        assert_eq!(pool.position_index.get(&0), Some(&4));

        // The whole pool is usable again.
        let c = pool.allocate(4 * CHUNK_SIZE).unwrap();
        pool.deallocate(c);
        assert_indices_consistent(&pool);
    }
}
