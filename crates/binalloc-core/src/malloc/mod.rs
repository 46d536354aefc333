//! Two-tier allocation: a segregated free-list pool in front of a fallback
//! allocator over the system heap.

pub mod allocator;
mod arena;
mod free_list;
pub mod shared;
pub mod size_class;
pub mod system;
pub mod traits;
pub mod typed;

pub use allocator::{AllocatorLogLevel, AllocatorLogRecord, PoolAllocator, PoolStats};
pub use arena::ArenaState;
pub use shared::SharedPool;
pub use size_class::{ALIGN, MAX_BYTES, NUM_FREE_LISTS};
pub use system::{FaultPlan, FaultyHeap, HostHeap, MallocAlloc, OomHandler, SystemHeap};
pub use traits::RawAlloc;
pub use typed::TypedAlloc;
