//! A pool usable from many threads.
//!
//! One `parking_lot::Mutex` serialises every operation. The out-of-memory
//! handler runs with the lock held, so it must not call back into the same
//! `SharedPool`.

use std::ptr::NonNull;

use parking_lot::Mutex;

use super::allocator::{AllocatorLogRecord, PoolAllocator, PoolStats};
use super::system::{HostHeap, OomHandler, SystemHeap};
use super::traits::RawAlloc;
use crate::config::PoolConfig;
use crate::error::AllocError;

pub struct SharedPool<H: SystemHeap = HostHeap> {
    inner: Mutex<PoolAllocator<H>>,
}

impl SharedPool<HostHeap> {
    pub fn new() -> Self {
        Self::from_pool(PoolAllocator::new())
    }

    pub fn with_config(config: PoolConfig) -> Self {
        Self::from_pool(PoolAllocator::with_config(config))
    }
}

impl Default for SharedPool<HostHeap> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: SystemHeap> SharedPool<H> {
    pub fn from_pool(pool: PoolAllocator<H>) -> Self {
        Self {
            inner: Mutex::new(pool),
        }
    }

    pub fn allocate(&self, n: usize) -> Result<NonNull<u8>, AllocError> {
        self.inner.lock().allocate(n)
    }

    /// # Safety
    ///
    /// Same contract as [`PoolAllocator::deallocate`]; the block may have
    /// been allocated on any thread.
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>, n: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { self.inner.lock().deallocate(ptr, n) }
    }

    /// # Safety
    ///
    /// Same contract as [`PoolAllocator::reallocate`].
    pub unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        // SAFETY: forwarded caller contract.
        unsafe { self.inner.lock().reallocate(ptr, old_size, new_size) }
    }

    pub fn set_oom_handler(&self, handler: Option<OomHandler>) -> Option<OomHandler> {
        self.inner.lock().set_oom_handler(handler)
    }

    pub fn stats(&self) -> PoolStats {
        self.inner.lock().stats()
    }

    pub fn drain_lifecycle_logs(&self) -> Vec<AllocatorLogRecord> {
        self.inner.lock().drain_lifecycle_logs()
    }

    /// Runs `f` with the pool locked, for batches of operations.
    pub fn with_pool<R>(&self, f: impl FnOnce(&mut PoolAllocator<H>) -> R) -> R {
        f(&mut self.inner.lock())
    }

    pub fn into_inner(self) -> PoolAllocator<H> {
        self.inner.into_inner()
    }
}

impl<H: SystemHeap> RawAlloc for SharedPool<H> {
    fn allocate(&mut self, n: usize) -> Result<NonNull<u8>, AllocError> {
        self.inner.get_mut().allocate(n)
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, n: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { self.inner.get_mut().deallocate(ptr, n) }
    }

    unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        // SAFETY: forwarded caller contract.
        unsafe { self.inner.get_mut().reallocate(ptr, old_size, new_size) }
    }

    fn set_oom_handler(&mut self, handler: Option<OomHandler>) -> Option<OomHandler> {
        self.inner.get_mut().set_oom_handler(handler)
    }
}
