//! Size classes for pooled allocations.
//!
//! Requests up to [`MAX_BYTES`] are rounded up to a multiple of [`ALIGN`];
//! each multiple is one class with its own free list. Anything larger goes
//! straight to the fallback allocator and never gets a class.

/// Block alignment and class granularity (bytes).
pub const ALIGN: usize = 8;

/// Largest request served from the free lists (bytes).
pub const MAX_BYTES: usize = 128;

/// Number of free lists, one per class.
pub const NUM_FREE_LISTS: usize = MAX_BYTES / ALIGN;

/// Rounds `bytes` up to the next multiple of [`ALIGN`].
#[inline]
pub const fn round_up(bytes: usize) -> usize {
    (bytes + ALIGN - 1) & !(ALIGN - 1)
}

/// Returns true if a request of `bytes` is served by the fallback allocator.
#[inline]
pub const fn is_large(bytes: usize) -> bool {
    bytes > MAX_BYTES
}

/// Maps a request size to its free-list index.
///
/// Zero is treated as a one-byte request. Returns `None` for sizes above
/// [`MAX_BYTES`].
#[inline]
pub const fn class_index(bytes: usize) -> Option<usize> {
    if is_large(bytes) {
        return None;
    }
    let bytes = if bytes == 0 { 1 } else { bytes };
    Some((bytes + ALIGN - 1) / ALIGN - 1)
}

/// Block size served by the free list at `index`, or 0 if out of range.
#[inline]
pub const fn class_size(index: usize) -> usize {
    if index < NUM_FREE_LISTS {
        (index + 1) * ALIGN
    } else {
        0
    }
}

/// Returns true if `a` and `b` share a free list.
///
/// Two large sizes never share one.
#[inline]
pub const fn same_class(a: usize, b: usize) -> bool {
    match (class_index(a), class_index(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}
