//! binalloc: a fixed-size-class pool allocator for container storage.
//!
//! Small requests (up to 128 bytes) are rounded to 8-byte classes and served
//! from per-class free lists refilled in batches from a growing arena.
//! Larger requests, and the arena itself, come from a fallback allocator
//! that runs a bounded out-of-memory handler protocol before failing.
//!
//! ```
//! use binalloc_core::PoolAllocator;
//!
//! let mut pool = PoolAllocator::new();
//! let block = pool.allocate(24).unwrap();
//! unsafe { pool.deallocate(block, 24) };
//! assert_eq!(pool.allocate(24).unwrap(), block);
//! ```

pub mod config;
pub mod error;
pub mod malloc;

pub use config::PoolConfig;
pub use error::{AllocError, ConfigError};
pub use malloc::{
    AllocatorLogLevel, AllocatorLogRecord, ArenaState, MallocAlloc, PoolAllocator, PoolStats, RawAlloc,
    SharedPool, TypedAlloc,
};
