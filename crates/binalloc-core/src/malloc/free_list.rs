//! Intrusive singly linked free lists.
//!
//! A free block stores the address of the next free block in its own first
//! machine word. [`read_link`] and [`write_link`] are the only places that
//! reinterpret block memory; everything else goes through [`FreeList`].

use std::ptr::{self, NonNull};

use super::size_class::ALIGN;

/// Reads the next-block link out of a free block.
///
/// # Safety
///
/// `block` must be a free block (its first word was last written by
/// [`write_link`]) at least one pointer wide and pointer-aligned.
#[inline]
unsafe fn read_link(block: NonNull<u8>) -> Option<NonNull<u8>> {
    // SAFETY: caller guarantees the first word holds a link.
    NonNull::new(unsafe { block.as_ptr().cast::<*mut u8>().read() })
}

/// Stores `next` as the link of a free block.
///
/// # Safety
///
/// `block` must be owned by the allocator (not live application data), at
/// least one pointer wide and pointer-aligned.
#[inline]
unsafe fn write_link(block: NonNull<u8>, next: Option<NonNull<u8>>) {
    debug_assert_eq!(block.as_ptr() as usize % ALIGN, 0, "misaligned free block");
    let raw = next.map_or(ptr::null_mut(), NonNull::as_ptr);
    // SAFETY: caller guarantees the block is allocator-owned.
    unsafe { block.as_ptr().cast::<*mut u8>().write(raw) }
}

/// Head of one size class's free chain.
#[derive(Debug, Default)]
pub(crate) struct FreeList {
    head: Option<NonNull<u8>>,
    len: usize,
}

impl FreeList {
    pub(crate) const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    /// Number of blocks currently chained.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Pops the head block.
    ///
    /// # Safety
    ///
    /// Every block on the list must still be free.
    pub(crate) unsafe fn pop(&mut self) -> Option<NonNull<u8>> {
        let block = self.head?;
        // SAFETY: blocks on the list are free, so the link is meaningful.
        self.head = unsafe { read_link(block) };
        self.len -= 1;
        Some(block)
    }

    /// Pushes `block` as the new head.
    ///
    /// # Safety
    ///
    /// `block` must be at least this class's size, pointer-aligned, and no
    /// longer referenced by its previous owner.
    pub(crate) unsafe fn push(&mut self, block: NonNull<u8>) {
        // SAFETY: caller hands ownership of the block to the list.
        unsafe { write_link(block, self.head) };
        self.head = Some(block);
        self.len += 1;
    }

    /// Threads `count` contiguous blocks of `block_size` bytes starting at
    /// `first` onto the front of the list, preserving address order.
    ///
    /// # Safety
    ///
    /// `[first, first + count * block_size)` must be allocator-owned memory
    /// and `block_size` a non-zero multiple of [`ALIGN`].
    pub(crate) unsafe fn push_run(&mut self, first: NonNull<u8>, block_size: usize, count: usize) {
        if count == 0 {
            return;
        }
        let mut next = self.head;
        for i in (0..count).rev() {
            // SAFETY: `i * block_size` stays inside the caller's range.
            let block = unsafe { first.add(i * block_size) };
            // SAFETY: see above.
            unsafe { write_link(block, next) };
            next = Some(block);
        }
        self.head = next;
        self.len += count;
    }

    /// Forgets every block without touching block memory.
    pub(crate) fn clear(&mut self) {
        self.head = None;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 8-byte aligned scratch storage for `n` 16-byte blocks.
    fn scratch(n: usize) -> Vec<u64> {
        vec![0u64; n * 2]
    }

    fn base(buf: &mut [u64]) -> NonNull<u8> {
        NonNull::new(buf.as_mut_ptr().cast::<u8>()).unwrap()
    }

    #[test]
    fn test_new_list_empty() {
        let mut list = FreeList::new();
        assert_eq!(list.len(), 0);
        assert!(unsafe { list.pop() }.is_none());
    }

    #[test]
    fn test_push_pop_lifo() {
        let mut buf = scratch(3);
        let a = base(&mut buf);
        let b = unsafe { a.add(16) };
        let mut list = FreeList::new();
        unsafe {
            list.push(a);
            list.push(b);
            assert_eq!(list.len(), 2);
            assert_eq!(list.pop(), Some(b));
            assert_eq!(list.pop(), Some(a));
            assert_eq!(list.pop(), None);
        }
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn test_link_lives_in_block_memory() {
        let mut buf = scratch(2);
        let a = base(&mut buf);
        let b = unsafe { a.add(16) };
        let mut list = FreeList::new();
        unsafe {
            list.push(a);
            list.push(b);
        }
        assert_eq!(buf[2] as usize, a.as_ptr() as usize);
        assert_eq!(buf[0], 0);
    }

    #[test]
    fn test_push_run_in_address_order() {
        let mut buf = scratch(4);
        let first = base(&mut buf);
        let mut list = FreeList::new();
        unsafe {
            list.push_run(first, 16, 4);
            assert_eq!(list.len(), 4);
            for i in 0..4 {
                assert_eq!(list.pop(), Some(first.add(i * 16)));
            }
        }
        assert_eq!(list.len(), 0);
    }

    #[test]
    fn test_push_run_keeps_existing_tail() {
        let mut buf = scratch(4);
        let first = base(&mut buf);
        let extra = unsafe { first.add(48) };
        let mut list = FreeList::new();
        unsafe {
            list.push(extra);
            list.push_run(first, 16, 2);
            assert_eq!(list.len(), 3);
            assert_eq!(list.pop(), Some(first));
            assert_eq!(list.pop(), Some(first.add(16)));
            assert_eq!(list.pop(), Some(extra));
        }
    }

    #[test]
    fn test_clear() {
        let mut buf = scratch(1);
        let mut list = FreeList::new();
        unsafe { list.push(base(&mut buf)) };
        list.clear();
        assert_eq!(list.len(), 0);
    }
}
