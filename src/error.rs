//! Unified error handling for ChunkForge
//!
//! Pool exhaustion is not an error: `SinglePool::allocate` returns
//! `None` and callers decide whether to grow or propagate. The error
//! type below covers construction-time misuse only. Contract
//! violations (deallocating an address the pool never produced)
//! panic, since no recovery is possible.

/// Errors raised when constructing or configuring a pool
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Pool was requested with a capacity of zero chunks
    #[error("pool capacity cannot be zero")]
    ZeroCapacity,

    /// Growth factor would not grow the pool geometrically
    #[error("growth factor must be at least 2, got {0}")]
    InvalidGrowthFactor(usize),
}

/// Helper type alias for Results using PoolError
pub type PoolResult<T> = std::result::Result<T, PoolError>;
