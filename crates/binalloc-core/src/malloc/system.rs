//! Fallback allocator over the host heap.
//!
//! [`MallocAlloc`] forwards to a [`SystemHeap`] and, when the heap refuses a
//! request, runs the out-of-memory retry protocol: invoke the installed
//! handler, retry, and give up with [`AllocError::OutOfMemory`] once the
//! handler budget is spent or if no handler is installed at all.

use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::DEFAULT_OOM_RETRY_LIMIT;
use crate::error::AllocError;

/// Callback invoked when the system heap fails. It is expected to release
/// memory (or abort) so the next attempt can succeed.
pub type OomHandler = Arc<dyn Fn() + Send + Sync>;

/// Raw byte-level access to a general-purpose heap.
///
/// Implementations return null on failure, like C `malloc`.
pub trait SystemHeap {
    /// Requests `size` bytes aligned to at least 8.
    fn malloc(&self, size: usize) -> *mut u8;

    /// Releases a block obtained from this heap.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `malloc`/`realloc` on this heap and must not be
    /// used afterwards. `size` is informational.
    unsafe fn free(&self, ptr: *mut u8, size: usize);

    /// Resizes a block, moving it if needed. On failure the original block
    /// is left untouched and null is returned.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live block from this heap of `old_size` bytes.
    unsafe fn realloc(&self, ptr: *mut u8, old_size: usize, new_size: usize) -> *mut u8;
}

/// The process heap, reached through libc.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostHeap;

impl SystemHeap for HostHeap {
    fn malloc(&self, size: usize) -> *mut u8 {
        // SAFETY: malloc has no preconditions; null is handled by callers.
        unsafe { libc::malloc(size) }.cast::<u8>()
    }

    unsafe fn free(&self, ptr: *mut u8, _size: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { libc::free(ptr.cast::<libc::c_void>()) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, _old_size: usize, new_size: usize) -> *mut u8 {
        // SAFETY: forwarded caller contract.
        unsafe { libc::realloc(ptr.cast::<libc::c_void>(), new_size) }.cast::<u8>()
    }
}

/// Shared switchboard for [`FaultyHeap`] failures.
///
/// Held behind an `Arc` so an out-of-memory handler can "release memory" by
/// calling [`FaultPlan::heal`].
#[derive(Debug)]
pub struct FaultPlan {
    fail_next: AtomicUsize,
    deny_above: AtomicUsize,
    denied: AtomicUsize,
}

impl FaultPlan {
    /// A plan that lets every request through.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail_next: AtomicUsize::new(0),
            deny_above: AtomicUsize::new(usize::MAX),
            denied: AtomicUsize::new(0),
        })
    }

    /// Fails the next `count` malloc/realloc requests regardless of size.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Fails every request strictly larger than `bytes`.
    pub fn deny_above(&self, bytes: usize) {
        self.deny_above.store(bytes, Ordering::SeqCst);
    }

    /// Clears all pending failures.
    pub fn heal(&self) {
        self.fail_next.store(0, Ordering::SeqCst);
        self.deny_above.store(usize::MAX, Ordering::SeqCst);
    }

    /// Number of requests refused so far.
    #[must_use]
    pub fn denied(&self) -> usize {
        self.denied.load(Ordering::SeqCst)
    }

    fn should_fail(&self, size: usize) -> bool {
        let fail = size > self.deny_above.load(Ordering::SeqCst)
            || self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if fail {
            self.denied.fetch_add(1, Ordering::SeqCst);
        }
        fail
    }
}

/// Host heap with injectable failures, for driving out-of-memory paths.
#[derive(Debug, Clone)]
pub struct FaultyHeap {
    inner: HostHeap,
    plan: Arc<FaultPlan>,
}

impl FaultyHeap {
    pub fn new(plan: Arc<FaultPlan>) -> Self {
        Self {
            inner: HostHeap,
            plan,
        }
    }

    pub fn plan(&self) -> &Arc<FaultPlan> {
        &self.plan
    }
}

impl SystemHeap for FaultyHeap {
    fn malloc(&self, size: usize) -> *mut u8 {
        if self.plan.should_fail(size) {
            return std::ptr::null_mut();
        }
        self.inner.malloc(size)
    }

    unsafe fn free(&self, ptr: *mut u8, size: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { self.inner.free(ptr, size) }
    }

    unsafe fn realloc(&self, ptr: *mut u8, old_size: usize, new_size: usize) -> *mut u8 {
        if self.plan.should_fail(new_size) {
            return std::ptr::null_mut();
        }
        // SAFETY: forwarded caller contract.
        unsafe { self.inner.realloc(ptr, old_size, new_size) }
    }
}

/// The fallback allocator.
///
/// Serves every request above the pool's maximum block size and supplies the
/// raw chunks the pool carves into blocks.
pub struct MallocAlloc<H: SystemHeap = HostHeap> {
    heap: H,
    handler: Option<OomHandler>,
    retry_limit: u32,
    handler_calls: u64,
}

impl MallocAlloc<HostHeap> {
    /// Fallback allocator over the process heap with the default retry bound.
    pub fn new() -> Self {
        Self::with_heap(HostHeap, DEFAULT_OOM_RETRY_LIMIT)
    }
}

impl Default for MallocAlloc<HostHeap> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: SystemHeap> MallocAlloc<H> {
    /// Creates a fallback allocator over `heap`. A zero `retry_limit` is
    /// raised to 1.
    pub fn with_heap(heap: H, retry_limit: u32) -> Self {
        Self {
            heap,
            handler: None,
            retry_limit: retry_limit.max(1),
            handler_calls: 0,
        }
    }

    pub fn heap(&self) -> &H {
        &self.heap
    }

    pub fn retry_limit(&self) -> u32 {
        self.retry_limit
    }

    /// Total handler invocations over this allocator's lifetime.
    pub fn handler_calls(&self) -> u64 {
        self.handler_calls
    }

    /// Returns true if an out-of-memory handler is installed.
    pub fn has_oom_handler(&self) -> bool {
        self.handler.is_some()
    }

    /// Installs `handler`, returning whatever was installed before.
    pub fn set_oom_handler(&mut self, handler: Option<OomHandler>) -> Option<OomHandler> {
        std::mem::replace(&mut self.handler, handler)
    }

    /// One attempt against the heap, without the handler protocol.
    pub fn try_allocate_once(&self, n: usize) -> Option<NonNull<u8>> {
        NonNull::new(self.heap.malloc(n.max(1)))
    }

    /// Allocates `n` bytes (a zero request is served as one byte).
    pub fn allocate(&mut self, n: usize) -> Result<NonNull<u8>, AllocError> {
        let n = n.max(1);
        if let Some(ptr) = self.try_allocate_once(n) {
            return Ok(ptr);
        }
        self.retry_after_handler(n, |heap| heap.malloc(n))
    }

    /// Returns a block to the heap.
    ///
    /// # Safety
    ///
    /// `ptr` must come from this allocator and must not be used afterwards.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>, n: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { self.heap.free(ptr.as_ptr(), n) }
    }

    /// Resizes a block with the same retry protocol as [`allocate`](Self::allocate).
    /// On failure `ptr` stays valid.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live block from this allocator of `old_size` bytes.
    pub unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        let new_size = new_size.max(1);
        // SAFETY: forwarded caller contract.
        let raw = unsafe { self.heap.realloc(ptr.as_ptr(), old_size, new_size) };
        if let Some(moved) = NonNull::new(raw) {
            return Ok(moved);
        }
        self.retry_after_handler(new_size, |heap| {
            // SAFETY: the failed realloc left `ptr` live.
            unsafe { heap.realloc(ptr.as_ptr(), old_size, new_size) }
        })
    }

    fn retry_after_handler<F>(&mut self, requested: usize, mut attempt: F) -> Result<NonNull<u8>, AllocError>
    where
        F: FnMut(&H) -> *mut u8,
    {
        let mut calls = 0u32;
        while calls < self.retry_limit {
            let Some(handler) = self.handler.clone() else {
                break;
            };
            handler();
            calls += 1;
            self.handler_calls += 1;
            if let Some(ptr) = NonNull::new(attempt(&self.heap)) {
                return Ok(ptr);
            }
        }
        Err(AllocError::OutOfMemory {
            requested,
            handler_calls: calls,
        })
    }
}

impl<H: SystemHeap> fmt::Debug for MallocAlloc<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MallocAlloc")
            .field("has_oom_handler", &self.handler.is_some())
            .field("retry_limit", &self.retry_limit)
            .field("handler_calls", &self.handler_calls)
            .finish()
    }
}
