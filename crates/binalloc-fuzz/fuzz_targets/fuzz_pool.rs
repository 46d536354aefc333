#![no_main]
use binalloc_core::PoolAllocator;
use binalloc_core::malloc::{FaultPlan, FaultyHeap};
use libfuzzer_sys::fuzz_target;
use std::ptr::NonNull;
use std::sync::Arc;

// Each 4-byte chunk is one operation: opcode, two size bytes, a slot byte.
fuzz_target!(|data: &[u8]| {
    let plan = FaultPlan::new();
    let mut pool = PoolAllocator::with_heap(FaultyHeap::new(Arc::clone(&plan)), Default::default());
    let mut live: Vec<(NonNull<u8>, usize, u8)> = Vec::new();

    for chunk in data.chunks_exact(4) {
        let size = u16::from_le_bytes([chunk[1], chunk[2]]) as usize % 1024;
        let tag = chunk[3];
        match chunk[0] % 5 {
            0 | 1 => {
                if let Ok(ptr) = pool.allocate(size) {
                    unsafe { ptr.as_ptr().write_bytes(tag, size) };
                    live.push((ptr, size, tag));
                }
            }
            2 => {
                if live.is_empty() {
                    continue;
                }
                let (ptr, n, tag) = live.swap_remove(tag as usize % live.len());
                let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), n) };
                assert!(bytes.iter().all(|&b| b == tag), "live block overwritten");
                unsafe { pool.deallocate(ptr, n) };
            }
            3 => {
                if live.is_empty() {
                    continue;
                }
                let index = tag as usize % live.len();
                let (ptr, n, old_tag) = live[index];
                if let Ok(moved) = unsafe { pool.reallocate(ptr, n, size) } {
                    let kept = n.min(size);
                    let bytes = unsafe { std::slice::from_raw_parts(moved.as_ptr(), kept) };
                    assert!(bytes.iter().all(|&b| b == old_tag), "reallocate lost contents");
                    unsafe { moved.as_ptr().write_bytes(old_tag, size) };
                    live[index] = (moved, size, old_tag);
                }
            }
            _ => {
                if tag & 1 == 0 {
                    plan.deny_above(size);
                } else {
                    plan.heal();
                }
            }
        }
    }

    plan.heal();
    for (ptr, n, _) in live {
        unsafe { pool.deallocate(ptr, n) };
    }
});
