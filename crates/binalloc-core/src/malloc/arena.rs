//! The carving arena.
//!
//! `[start_free, end_free)` is raw memory not yet handed to any free list.
//! Chunks are cut from the front; when too little is left the pool grows the
//! arena with a fresh region from the fallback allocator (or a salvaged free
//! block) and the old remainder is pushed onto a free list first.

use std::ptr::{self, NonNull};

use serde::{Deserialize, Serialize};

/// Coarse arena state, driven entirely by chunk allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArenaState {
    /// Nothing acquired yet.
    Empty,
    /// Some bytes remain to be carved.
    Partial,
    /// Every acquired byte has been carved; the next chunk needs growth.
    Exhausted,
}

#[derive(Debug)]
pub(crate) struct Arena {
    start_free: *mut u8,
    end_free: *mut u8,
    /// Total bytes ever acquired from the fallback allocator.
    heap_size: usize,
}

impl Arena {
    pub(crate) const fn new() -> Self {
        Self {
            start_free: ptr::null_mut(),
            end_free: ptr::null_mut(),
            heap_size: 0,
        }
    }

    /// Bytes left between `start_free` and `end_free`.
    #[inline]
    pub(crate) fn remaining(&self) -> usize {
        self.end_free as usize - self.start_free as usize
    }

    pub(crate) fn heap_size(&self) -> usize {
        self.heap_size
    }

    pub(crate) fn state(&self) -> ArenaState {
        if self.heap_size == 0 && self.start_free.is_null() {
            ArenaState::Empty
        } else if self.remaining() > 0 {
            ArenaState::Partial
        } else {
            ArenaState::Exhausted
        }
    }

    /// Cuts `bytes` off the front of the arena.
    ///
    /// Callers check [`remaining`](Self::remaining) first.
    pub(crate) fn carve(&mut self, bytes: usize) -> NonNull<u8> {
        debug_assert!(bytes > 0 && bytes <= self.remaining());
        // SAFETY: a region with bytes remaining was installed from a NonNull.
        let block = unsafe { NonNull::new_unchecked(self.start_free) };
        // SAFETY: `bytes <= remaining`, so the result stays within or one
        // past the end of the current region.
        self.start_free = unsafe { self.start_free.add(bytes) };
        block
    }

    /// Hands over whatever is left, leaving the arena empty.
    pub(crate) fn take_remainder(&mut self) -> Option<(NonNull<u8>, usize)> {
        let left = self.remaining();
        let start = NonNull::new(self.start_free)?;
        if left == 0 {
            return None;
        }
        self.start_free = self.end_free;
        Some((start, left))
    }

    /// Replaces the region with freshly acquired memory and counts it.
    pub(crate) fn install_acquired(&mut self, region: NonNull<u8>, bytes: usize) {
        self.install(region, bytes);
        self.heap_size += bytes;
    }

    /// Replaces the region with memory the pool already owned (a salvaged
    /// free block); `heap_size` is unchanged.
    pub(crate) fn install_salvaged(&mut self, region: NonNull<u8>, bytes: usize) {
        self.install(region, bytes);
    }

    /// Forgets the current region.
    pub(crate) fn reset(&mut self) {
        self.start_free = ptr::null_mut();
        self.end_free = ptr::null_mut();
    }

    fn install(&mut self, region: NonNull<u8>, bytes: usize) {
        self.start_free = region.as_ptr();
        // SAFETY: `region` is valid for `bytes` bytes.
        self.end_free = unsafe { region.as_ptr().add(bytes) };
    }
}
