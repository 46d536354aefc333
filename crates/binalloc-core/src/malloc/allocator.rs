//! Segregated free-list pool allocator.
//!
//! Requests up to [`MAX_BYTES`] are rounded to an 8-byte class and served
//! from that class's free list in O(1). An empty list is refilled with a
//! batch of blocks carved from the arena in one step; an exhausted arena is
//! grown from the fallback allocator. Larger requests bypass the pool.
//!
//! Deallocation trusts the caller's size: freeing with a size from a
//! different class than the allocation corrupts the free lists, and nothing
//! here checks for it.

use std::collections::VecDeque;
use std::fmt;
use std::ptr::{self, NonNull};

use serde::{Deserialize, Serialize};

use super::arena::{Arena, ArenaState};
use super::free_list::FreeList;
use super::size_class::{self, ALIGN, MAX_BYTES, NUM_FREE_LISTS};
use super::system::{HostHeap, MallocAlloc, OomHandler, SystemHeap};
use crate::config::PoolConfig;
use crate::error::AllocError;

/// Upper bound on grow-or-salvage rounds inside one chunk allocation.
/// One round always suffices; the bound keeps a broken invariant from
/// spinning forever.
const MAX_CHUNK_ATTEMPTS: usize = 4;

/// Allocator lifecycle log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocatorLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Structured allocator lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocatorLogRecord {
    /// Monotonic decision/event id.
    pub decision_id: u64,
    /// Correlation id for this lifecycle record.
    pub trace_id: String,
    /// Severity level.
    pub level: AllocatorLogLevel,
    /// API symbol (`allocate`, `deallocate`, `reallocate`, `refill`, `chunk_alloc`).
    pub symbol: &'static str,
    /// Event kind (`alloc`, `free`, `arena_grow`, ...).
    pub event: &'static str,
    /// Block address involved in the event.
    pub ptr: Option<usize>,
    /// Size value involved in the event.
    pub size: Option<usize>,
    /// Free-list index, when the request was size-classed.
    pub class: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Free-form details for debugging.
    pub details: String,
    /// Snapshot: bytes acquired for the arena so far.
    pub heap_size: usize,
    /// Snapshot: bytes left in the arena.
    pub arena_remaining: usize,
}

/// Point-in-time view of pool bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub heap_size: usize,
    pub arena_remaining: usize,
    pub arena_state: ArenaState,
    /// Free blocks per class, indexed like the free-list table.
    pub free_blocks: Vec<usize>,
    pub refills: u64,
    pub chunk_allocs: u64,
    pub arena_growths: u64,
    /// Free blocks sacrificed as arena after a failed growth.
    pub salvaged_blocks: u64,
    /// Requests above the maximum block size.
    pub fallback_allocs: u64,
    /// Size of the most recent arena acquisition.
    pub last_growth_bytes: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    refills: u64,
    chunk_allocs: u64,
    arena_growths: u64,
    salvaged_blocks: u64,
    fallback_allocs: u64,
    last_growth_bytes: usize,
}

/// A run of same-size blocks carved in one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Chunk {
    pub(crate) base: NonNull<u8>,
    /// Number of blocks actually obtained; may be fewer than requested.
    pub(crate) blocks: usize,
}

/// The pool allocator.
///
/// Single caller at a time: every operation takes `&mut self`, and the
/// allocator is `Send` but not `Sync`. Use one instance per thread, or wrap
/// it in a [`SharedPool`](super::SharedPool).
pub struct PoolAllocator<H: SystemHeap = HostHeap> {
    free_lists: [FreeList; NUM_FREE_LISTS],
    arena: Arena,
    fallback: MallocAlloc<H>,
    /// Regions acquired for the arena, returned on drop.
    chunks: Vec<(NonNull<u8>, usize)>,
    config: PoolConfig,
    counters: Counters,
    next_decision_id: u64,
    lifecycle_logs: VecDeque<AllocatorLogRecord>,
}

// SAFETY: the pool exclusively owns its arena regions and free blocks; raw
// pointers never alias memory held by another pool.
unsafe impl<H: SystemHeap + Send> Send for PoolAllocator<H> {}

impl PoolAllocator<HostHeap> {
    /// Creates a pool over the process heap with default settings.
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    pub fn with_config(config: PoolConfig) -> Self {
        Self::with_heap(HostHeap, config)
    }
}

impl Default for PoolAllocator<HostHeap> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: SystemHeap> PoolAllocator<H> {
    /// Creates a pool over `heap`. A zero batch size is raised to 1.
    pub fn with_heap(heap: H, config: PoolConfig) -> Self {
        let config = PoolConfig {
            batch_size: config.batch_size.max(1),
            ..config
        };
        Self {
            free_lists: std::array::from_fn(|_| FreeList::new()),
            arena: Arena::new(),
            fallback: MallocAlloc::with_heap(heap, config.oom_retry_limit),
            chunks: Vec::new(),
            config,
            counters: Counters::default(),
            next_decision_id: 1,
            lifecycle_logs: VecDeque::new(),
        }
    }

    fn next_log_decision_id(&mut self) -> u64 {
        let id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        id
    }

    #[allow(clippy::too_many_arguments)]
    fn record_lifecycle(
        &mut self,
        level: AllocatorLogLevel,
        symbol: &'static str,
        event: &'static str,
        ptr: Option<NonNull<u8>>,
        size: Option<usize>,
        class: Option<usize>,
        outcome: &'static str,
        details: impl Into<String>,
    ) {
        let capacity = self.config.log_capacity;
        if capacity == 0 {
            return;
        }
        let decision_id = self.next_log_decision_id();
        let trace_id = format!("binalloc::pool::{}::{:016x}", symbol, decision_id);
        while self.lifecycle_logs.len() >= capacity {
            self.lifecycle_logs.pop_front();
        }
        self.lifecycle_logs.push_back(AllocatorLogRecord {
            decision_id,
            trace_id,
            level,
            symbol,
            event,
            ptr: ptr.map(|p| p.as_ptr() as usize),
            size,
            class,
            outcome,
            details: details.into(),
            heap_size: self.arena.heap_size(),
            arena_remaining: self.arena.remaining(),
        });
    }

    /// Allocates `n` bytes, 8-byte aligned. A zero request is served as a
    /// one-byte request.
    pub fn allocate(&mut self, n: usize) -> Result<NonNull<u8>, AllocError> {
        let Some(index) = size_class::class_index(n) else {
            return self.allocate_large(n);
        };

        // SAFETY: blocks on a pool free list are never live.
        if let Some(block) = unsafe { self.free_lists[index].pop() } {
            self.record_lifecycle(
                AllocatorLogLevel::Trace,
                "allocate",
                "alloc",
                Some(block),
                Some(n),
                Some(index),
                "success",
                "path=free_list_hit",
            );
            return Ok(block);
        }

        match self.refill(size_class::class_size(index)) {
            Ok(block) => {
                self.record_lifecycle(
                    AllocatorLogLevel::Trace,
                    "allocate",
                    "alloc",
                    Some(block),
                    Some(n),
                    Some(index),
                    "success",
                    "path=refill",
                );
                Ok(block)
            }
            Err(err) => {
                self.record_lifecycle(
                    AllocatorLogLevel::Error,
                    "allocate",
                    "oom",
                    None,
                    Some(n),
                    Some(index),
                    "failed",
                    err.to_string(),
                );
                Err(err)
            }
        }
    }

    fn allocate_large(&mut self, n: usize) -> Result<NonNull<u8>, AllocError> {
        match self.fallback.allocate(n) {
            Ok(ptr) => {
                self.counters.fallback_allocs += 1;
                self.record_lifecycle(
                    AllocatorLogLevel::Trace,
                    "allocate",
                    "alloc",
                    Some(ptr),
                    Some(n),
                    None,
                    "success",
                    "path=fallback",
                );
                Ok(ptr)
            }
            Err(err) => {
                self.record_lifecycle(
                    AllocatorLogLevel::Error,
                    "allocate",
                    "oom",
                    None,
                    Some(n),
                    None,
                    "failed",
                    err.to_string(),
                );
                Err(err)
            }
        }
    }

    /// Returns a block to its class's free list, or to the fallback
    /// allocator for sizes above [`MAX_BYTES`].
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by this pool's `allocate`/`reallocate`
    /// for exactly `n` bytes (any size in the same class is equivalent) and
    /// must not be used again until handed out anew.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>, n: usize) {
        match size_class::class_index(n) {
            None => {
                // SAFETY: large blocks come straight from the fallback allocator.
                unsafe { self.fallback.deallocate(ptr, n) };
                self.record_lifecycle(
                    AllocatorLogLevel::Trace,
                    "deallocate",
                    "free",
                    Some(ptr),
                    Some(n),
                    None,
                    "success",
                    "path=fallback",
                );
            }
            Some(index) => {
                // SAFETY: caller hands back a block of this class.
                unsafe { self.free_lists[index].push(ptr) };
                self.record_lifecycle(
                    AllocatorLogLevel::Trace,
                    "deallocate",
                    "free",
                    Some(ptr),
                    Some(n),
                    Some(index),
                    "success",
                    "path=free_list_push",
                );
            }
        }
    }

    /// Resizes a block. Contents are preserved up to `min(old_size, new_size)`.
    ///
    /// Sizes in the same class keep the block; two large sizes use the
    /// system reallocator; anything else allocates, copies and frees. On
    /// error `ptr` is still valid.
    ///
    /// # Safety
    ///
    /// `ptr` must be live and owned by the caller with true size `old_size`,
    /// under the same contract as [`deallocate`](Self::deallocate).
    pub unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        if size_class::is_large(old_size) && size_class::is_large(new_size) {
            // SAFETY: both sizes are large, so `ptr` belongs to the fallback allocator.
            let result = unsafe { self.fallback.reallocate(ptr, old_size, new_size) };
            self.record_lifecycle(
                if result.is_ok() {
                    AllocatorLogLevel::Trace
                } else {
                    AllocatorLogLevel::Error
                },
                "reallocate",
                "realloc_fallback",
                result.ok(),
                Some(new_size),
                None,
                if result.is_ok() { "success" } else { "oom" },
                format!("old_ptr={:#x} old_size={}", ptr.as_ptr() as usize, old_size),
            );
            return result;
        }

        if size_class::same_class(old_size, new_size) {
            self.record_lifecycle(
                AllocatorLogLevel::Trace,
                "reallocate",
                "realloc_in_place",
                Some(ptr),
                Some(new_size),
                size_class::class_index(new_size),
                "success",
                format!("old_size={}", old_size),
            );
            return Ok(ptr);
        }

        let fresh = match self.allocate(new_size) {
            Ok(fresh) => fresh,
            Err(err) => {
                self.record_lifecycle(
                    AllocatorLogLevel::Warn,
                    "reallocate",
                    "realloc_allocate_new_failed",
                    Some(ptr),
                    Some(new_size),
                    size_class::class_index(new_size),
                    "oom",
                    format!("old_size={}", old_size),
                );
                return Err(err);
            }
        };

        // SAFETY: `ptr` is live for `old_size` bytes, `fresh` for `new_size`,
        // and the two blocks are distinct.
        unsafe {
            ptr::copy_nonoverlapping(ptr.as_ptr(), fresh.as_ptr(), old_size.min(new_size));
            self.deallocate(ptr, old_size);
        }
        self.record_lifecycle(
            AllocatorLogLevel::Trace,
            "reallocate",
            "realloc_move",
            Some(fresh),
            Some(new_size),
            size_class::class_index(new_size),
            "success",
            format!(
                "old_ptr={:#x} old_size={} copied={}",
                ptr.as_ptr() as usize,
                old_size,
                old_size.min(new_size)
            ),
        );
        Ok(fresh)
    }

    /// Installs an out-of-memory handler on the fallback allocator,
    /// returning the previous one.
    pub fn set_oom_handler(&mut self, handler: Option<OomHandler>) -> Option<OomHandler> {
        self.fallback.set_oom_handler(handler)
    }

    /// Obtains a batch of `rounded`-byte blocks, returns the first and
    /// chains the rest onto the class's free list.
    pub(crate) fn refill(&mut self, rounded: usize) -> Result<NonNull<u8>, AllocError> {
        debug_assert_eq!(rounded % ALIGN, 0);
        self.counters.refills += 1;
        let chunk = self.chunk_alloc(rounded, self.config.batch_size)?;
        let index = size_class::class_index(rounded);

        if let Some(index) = index.filter(|_| chunk.blocks > 1) {
            // SAFETY: the chunk spans `blocks * rounded` bytes freshly carved
            // from the arena; block 0 goes to the caller, the rest to the list.
            unsafe {
                let second = chunk.base.add(rounded);
                self.free_lists[index].push_run(second, rounded, chunk.blocks - 1);
            }
        }
        self.record_lifecycle(
            AllocatorLogLevel::Debug,
            "refill",
            "refill",
            Some(chunk.base),
            Some(rounded),
            index,
            "success",
            format!("blocks={} listed={}", chunk.blocks, chunk.blocks - 1),
        );
        Ok(chunk.base)
    }

    /// Carves up to `nobjs` blocks of `size` bytes from the arena, growing
    /// it when not even one block fits. The returned chunk reports how many
    /// blocks were actually obtained.
    pub(crate) fn chunk_alloc(&mut self, size: usize, nobjs: usize) -> Result<Chunk, AllocError> {
        debug_assert!(size > 0 && size % ALIGN == 0 && size <= MAX_BYTES);
        self.counters.chunk_allocs += 1;
        let total = size.saturating_mul(nobjs);

        for _ in 0..MAX_CHUNK_ATTEMPTS {
            let left = self.arena.remaining();
            if left >= total {
                let base = self.arena.carve(total);
                self.record_lifecycle(
                    AllocatorLogLevel::Trace,
                    "chunk_alloc",
                    "chunk_full",
                    Some(base),
                    Some(size),
                    size_class::class_index(size),
                    "success",
                    format!("blocks={}", nobjs),
                );
                return Ok(Chunk {
                    base,
                    blocks: nobjs,
                });
            }
            if left >= size {
                let blocks = left / size;
                let base = self.arena.carve(blocks * size);
                self.record_lifecycle(
                    AllocatorLogLevel::Debug,
                    "chunk_alloc",
                    "chunk_partial",
                    Some(base),
                    Some(size),
                    size_class::class_index(size),
                    "reduced",
                    format!("requested={} obtained={}", nobjs, blocks),
                );
                return Ok(Chunk { base, blocks });
            }
            self.grow_arena(size, total)?;
        }

        self.record_lifecycle(
            AllocatorLogLevel::Error,
            "chunk_alloc",
            "chunk_attempts_exhausted",
            None,
            Some(size),
            size_class::class_index(size),
            "failed",
            format!("attempts={}", MAX_CHUNK_ATTEMPTS),
        );
        Err(AllocError::OutOfMemory {
            requested: total,
            handler_calls: 0,
        })
    }

    /// Replaces the arena with a new region: fresh memory from the fallback
    /// allocator if it has any, otherwise a salvaged free block of at least
    /// `size` bytes, otherwise whatever the fallback's handler protocol
    /// manages to free.
    fn grow_arena(&mut self, size: usize, total: usize) -> Result<(), AllocError> {
        let bytes_to_get = total
            .saturating_mul(2)
            .saturating_add(size_class::round_up(self.arena.heap_size() >> 4));

        self.salvage_remainder();

        if let Some(region) = self.fallback.try_allocate_once(bytes_to_get) {
            self.adopt_region(region, bytes_to_get);
            return Ok(());
        }
        self.record_lifecycle(
            AllocatorLogLevel::Warn,
            "chunk_alloc",
            "arena_grow_failed",
            None,
            Some(bytes_to_get),
            None,
            "degraded",
            "system_heap_refused_growth",
        );

        if self.salvage_free_block(size) {
            return Ok(());
        }

        self.arena.reset();
        self.record_lifecycle(
            AllocatorLogLevel::Warn,
            "chunk_alloc",
            "escalate_to_fallback",
            None,
            Some(bytes_to_get),
            None,
            "retrying",
            "no_free_block_to_salvage",
        );
        match self.fallback.allocate(bytes_to_get) {
            Ok(region) => {
                self.adopt_region(region, bytes_to_get);
                Ok(())
            }
            Err(err) => {
                self.record_lifecycle(
                    AllocatorLogLevel::Error,
                    "chunk_alloc",
                    "oom",
                    None,
                    Some(bytes_to_get),
                    None,
                    "failed",
                    err.to_string(),
                );
                Err(err)
            }
        }
    }

    /// Moves the arena's leftover bytes onto the free list of their own size.
    fn salvage_remainder(&mut self) {
        let Some((start, left)) = self.arena.take_remainder() else {
            return;
        };
        // Leftovers are whole multiples of ALIGN smaller than the block that
        // did not fit, so they always form exactly one block of some class.
        if left % ALIGN != 0 {
            return;
        }
        let Some(index) = size_class::class_index(left) else {
            return;
        };
        // SAFETY: the remainder was never carved, so nobody else references it.
        unsafe { self.free_lists[index].push(start) };
        self.record_lifecycle(
            AllocatorLogLevel::Debug,
            "chunk_alloc",
            "arena_salvage_remainder",
            Some(start),
            Some(left),
            Some(index),
            "listed",
            "",
        );
    }

    /// Takes one free block of `size` bytes or more and makes it the arena.
    fn salvage_free_block(&mut self, size: usize) -> bool {
        let Some(first) = size_class::class_index(size) else {
            return false;
        };
        for index in first..NUM_FREE_LISTS {
            // SAFETY: blocks on a pool free list are never live.
            let Some(block) = (unsafe { self.free_lists[index].pop() }) else {
                continue;
            };
            let bytes = size_class::class_size(index);
            self.arena.install_salvaged(block, bytes);
            self.counters.salvaged_blocks += 1;
            self.record_lifecycle(
                AllocatorLogLevel::Warn,
                "chunk_alloc",
                "salvage_free_block",
                Some(block),
                Some(bytes),
                Some(index),
                "degraded",
                format!("requested_size={}", size),
            );
            return true;
        }
        false
    }

    fn adopt_region(&mut self, region: NonNull<u8>, bytes: usize) {
        self.chunks.push((region, bytes));
        self.arena.install_acquired(region, bytes);
        self.counters.arena_growths += 1;
        self.counters.last_growth_bytes = bytes;
        self.record_lifecycle(
            AllocatorLogLevel::Info,
            "chunk_alloc",
            "arena_grow",
            Some(region),
            Some(bytes),
            None,
            "success",
            format!("regions={}", self.chunks.len()),
        );
    }

    /// Total bytes acquired for the arena over the pool's lifetime.
    pub fn heap_size(&self) -> usize {
        self.arena.heap_size()
    }

    pub fn arena_remaining(&self) -> usize {
        self.arena.remaining()
    }

    pub fn arena_state(&self) -> ArenaState {
        self.arena.state()
    }

    /// Free blocks currently listed for class `index` (0 when out of range).
    pub fn free_blocks(&self, index: usize) -> usize {
        self.free_lists.get(index).map_or(0, FreeList::len)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// The fallback allocator backing this pool.
    pub fn fallback(&self) -> &MallocAlloc<H> {
        &self.fallback
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            heap_size: self.arena.heap_size(),
            arena_remaining: self.arena.remaining(),
            arena_state: self.arena.state(),
            free_blocks: self.free_lists.iter().map(FreeList::len).collect(),
            refills: self.counters.refills,
            chunk_allocs: self.counters.chunk_allocs,
            arena_growths: self.counters.arena_growths,
            salvaged_blocks: self.counters.salvaged_blocks,
            fallback_allocs: self.counters.fallback_allocs,
            last_growth_bytes: self.counters.last_growth_bytes,
        }
    }

    /// Returns the retained allocator lifecycle log records, oldest first.
    pub fn lifecycle_logs(&self) -> &VecDeque<AllocatorLogRecord> {
        &self.lifecycle_logs
    }

    /// Drains allocator lifecycle log records.
    pub fn drain_lifecycle_logs(&mut self) -> Vec<AllocatorLogRecord> {
        Vec::from(std::mem::take(&mut self.lifecycle_logs))
    }
}

impl<H: SystemHeap> Drop for PoolAllocator<H> {
    fn drop(&mut self) {
        for list in &mut self.free_lists {
            list.clear();
        }
        self.arena.reset();
        for (region, bytes) in self.chunks.drain(..) {
            // SAFETY: every region came from this fallback allocator, and
            // all blocks carved from it die with the pool.
            unsafe { self.fallback.deallocate(region, bytes) };
        }
    }
}

impl<H: SystemHeap> fmt::Debug for PoolAllocator<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolAllocator")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .field("fallback", &self.fallback)
            .finish()
    }
}
