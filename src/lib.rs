//! ChunkForge - chunk-based growable memory pool
//!
//! Services variable-sized byte allocations from contiguous backing
//! buffers partitioned into fixed-size chunks. Freed regions are
//! coalesced with their neighbors and indexed by size for best-fit
//! reuse, making the pool a fast alternative to a general-purpose
//! allocator when many similarly-sized buffers (e.g. numeric arrays)
//! are created and destroyed within a known working set.
//!
//! Two allocators are provided:
//! - [`SinglePool`]: one fixed-capacity buffer; allocation can fail.
//! - [`MultiPool`]: an append-only sequence of single pools that grows
//!   geometrically on demand; allocation never fails.
//!
//! All operations are single-threaded; callers wanting concurrency
//! must serialize externally.

pub mod error;
pub mod logging;
pub mod pool;
pub mod view;

pub use error::{PoolError, PoolResult};
pub use pool::{
    required_chunks, AllocationStats, ChunkRange, MultiPool, PoolConfig, SinglePool, CHUNK_SIZE,
};
pub use view::TypedView;
