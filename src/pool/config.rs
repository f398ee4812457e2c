//! Configuration for the growable pool
//!
//! This module defines [`PoolConfig`] which controls the initial
//! capacity and the growth policy of a
//! [`MultiPool`](super::MultiPool).

use crate::error::{PoolError, PoolResult};

/// Configuration for a growable pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Capacity of the first pool, in chunks
    pub initial_chunks: usize,

    /// Geometric growth factor applied to the largest existing pool
    /// when a new pool is appended. Must be at least 2 so total
    /// capacity grows geometrically.
    pub growth_factor: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            initial_chunks: 64,
            growth_factor: 2,
        }
    }
}

impl PoolConfig {
    /// Create a new pool config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial capacity in chunks
    pub fn with_initial_chunks(mut self, initial_chunks: usize) -> Self {
        self.initial_chunks = initial_chunks;
        self
    }

    /// Set the growth factor
    pub fn with_growth_factor(mut self, growth_factor: usize) -> Self {
        self.growth_factor = growth_factor;
        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    /// - [`PoolError::ZeroCapacity`] if `initial_chunks` is zero
    /// - [`PoolError::InvalidGrowthFactor`] if `growth_factor` < 2
    pub fn validate(&self) -> PoolResult<()> {
        if self.initial_chunks == 0 {
            return Err(PoolError::ZeroCapacity);
        }
        if self.growth_factor < 2 {
            return Err(PoolError::InvalidGrowthFactor(self.growth_factor));
        }
        Ok(())
    }
}
