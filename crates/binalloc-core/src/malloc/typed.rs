//! Element-count allocation for containers.
//!
//! Containers think in elements, the raw allocators in bytes. [`TypedAlloc`]
//! does the multiplication (checked), rejects element types the pool cannot
//! align, and keeps zero-byte requests away from the allocator entirely.

use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::ptr::NonNull;

use super::size_class::ALIGN;
use super::traits::RawAlloc;
use crate::error::AllocError;

/// Typed front end over any [`RawAlloc`].
///
/// Zero elements, or any count of a zero-sized `T`, yield a dangling
/// well-aligned pointer without touching the allocator; passing such a
/// pointer back to `deallocate`/`reallocate` with the same count is a no-op.
pub struct TypedAlloc<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedAlloc<T> {
    fn byte_len(count: usize) -> Result<usize, AllocError> {
        if align_of::<T>() > ALIGN {
            return Err(AllocError::UnsupportedAlignment {
                align: align_of::<T>(),
                max: ALIGN,
            });
        }
        count
            .checked_mul(size_of::<T>())
            .filter(|&bytes| bytes <= isize::MAX as usize)
            .ok_or(AllocError::CapacityOverflow {
                count,
                elem_size: size_of::<T>(),
            })
    }

    /// Allocates uninitialised storage for `count` values of `T`.
    pub fn allocate<A: RawAlloc + ?Sized>(alloc: &mut A, count: usize) -> Result<NonNull<T>, AllocError> {
        match Self::byte_len(count)? {
            0 => Ok(NonNull::dangling()),
            bytes => alloc.allocate(bytes).map(NonNull::cast),
        }
    }

    pub fn allocate_one<A: RawAlloc + ?Sized>(alloc: &mut A) -> Result<NonNull<T>, AllocError> {
        Self::allocate(alloc, 1)
    }

    /// Releases storage for `count` values. Does not drop them.
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`allocate`](Self::allocate) or
    /// [`reallocate`](Self::reallocate) on `alloc` with the same `count`.
    pub unsafe fn deallocate<A: RawAlloc + ?Sized>(alloc: &mut A, ptr: NonNull<T>, count: usize) {
        // Counts that overflow could never have been allocated.
        let Ok(bytes) = Self::byte_len(count) else {
            return;
        };
        if bytes != 0 {
            // SAFETY: forwarded caller contract.
            unsafe { alloc.deallocate(ptr.cast(), bytes) };
        }
    }

    /// # Safety
    ///
    /// Same as [`deallocate`](Self::deallocate) with a count of one.
    pub unsafe fn deallocate_one<A: RawAlloc + ?Sized>(alloc: &mut A, ptr: NonNull<T>) {
        // SAFETY: forwarded caller contract.
        unsafe { Self::deallocate(alloc, ptr, 1) }
    }

    /// Resizes storage from `old_count` to `new_count` values, moving the
    /// first `min(old_count, new_count)` of them bitwise.
    ///
    /// # Safety
    ///
    /// `ptr` must be live storage for `old_count` values obtained from
    /// `alloc` through this type.
    pub unsafe fn reallocate<A: RawAlloc + ?Sized>(
        alloc: &mut A,
        ptr: NonNull<T>,
        old_count: usize,
        new_count: usize,
    ) -> Result<NonNull<T>, AllocError> {
        let old_bytes = Self::byte_len(old_count)?;
        let new_bytes = Self::byte_len(new_count)?;
        match (old_bytes, new_bytes) {
            (0, _) => Self::allocate(alloc, new_count),
            (_, 0) => {
                // SAFETY: forwarded caller contract.
                unsafe { alloc.deallocate(ptr.cast(), old_bytes) };
                Ok(NonNull::dangling())
            }
            // SAFETY: forwarded caller contract.
            _ => unsafe { alloc.reallocate(ptr.cast(), old_bytes, new_bytes) }.map(NonNull::cast),
        }
    }
}
