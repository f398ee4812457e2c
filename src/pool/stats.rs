//! Allocation statistics for monitoring and tuning

/// Allocation statistics for monitoring and optimization
///
/// Maintained by [`MultiPool`](super::MultiPool) across its whole
/// lifetime; [`reset_stats`](super::MultiPool::reset_stats) clears
/// the counters without touching live allocations.
#[derive(Debug, Clone, Default)]
pub struct AllocationStats {
    /// Total number of allocations
    pub total_allocations: usize,
    /// Total number of deallocations
    pub total_deallocations: usize,
    /// Peak allocations live simultaneously
    pub peak_allocations: usize,
    /// Current live allocations
    pub current_allocations: usize,
    /// Number of pools appended beyond the initial one
    pub grow_count: usize,
}
