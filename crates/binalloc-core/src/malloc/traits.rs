//! The raw byte-allocator interface shared by every allocator in this crate.

use std::ptr::NonNull;

use super::allocator::PoolAllocator;
use super::system::{MallocAlloc, OomHandler, SystemHeap};
use crate::error::AllocError;

/// Untyped allocation by byte count, with the size passed back on free.
///
/// Callers remember the size of every block they hold; implementations may
/// rely on it being the size the block was allocated (or last resized) with.
pub trait RawAlloc {
    /// Allocates `n` bytes aligned to at least 8.
    fn allocate(&mut self, n: usize) -> Result<NonNull<u8>, AllocError>;

    /// Releases a block.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from this allocator with size `n` and must not
    /// be used afterwards.
    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, n: usize);

    /// Resizes a block, preserving `min(old_size, new_size)` bytes. On
    /// error the original block is untouched.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live block from this allocator of `old_size` bytes.
    unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Result<NonNull<u8>, AllocError>;

    /// Installs an out-of-memory handler, returning the previous one.
    fn set_oom_handler(&mut self, handler: Option<OomHandler>) -> Option<OomHandler>;
}

impl<H: SystemHeap> RawAlloc for MallocAlloc<H> {
    fn allocate(&mut self, n: usize) -> Result<NonNull<u8>, AllocError> {
        MallocAlloc::allocate(self, n)
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, n: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { MallocAlloc::deallocate(self, ptr, n) }
    }

    unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        // SAFETY: forwarded caller contract.
        unsafe { MallocAlloc::reallocate(self, ptr, old_size, new_size) }
    }

    fn set_oom_handler(&mut self, handler: Option<OomHandler>) -> Option<OomHandler> {
        MallocAlloc::set_oom_handler(self, handler)
    }
}

impl<H: SystemHeap> RawAlloc for PoolAllocator<H> {
    fn allocate(&mut self, n: usize) -> Result<NonNull<u8>, AllocError> {
        PoolAllocator::allocate(self, n)
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, n: usize) {
        // SAFETY: forwarded caller contract.
        unsafe { PoolAllocator::deallocate(self, ptr, n) }
    }

    unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        // SAFETY: forwarded caller contract.
        unsafe { PoolAllocator::reallocate(self, ptr, old_size, new_size) }
    }

    fn set_oom_handler(&mut self, handler: Option<OomHandler>) -> Option<OomHandler> {
        PoolAllocator::set_oom_handler(self, handler)
    }
}
