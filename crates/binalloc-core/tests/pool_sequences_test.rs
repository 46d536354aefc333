use binalloc_core::malloc::{ALIGN, MAX_BYTES, NUM_FREE_LISTS};
use binalloc_core::{ArenaState, PoolAllocator, PoolConfig, PoolStats};
use serde_json::{Value, json};
use std::ptr::NonNull;

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn gen_range_usize(&mut self, low: usize, high_inclusive: usize) -> usize {
        assert!(low <= high_inclusive);
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

#[derive(Clone, Copy, Debug)]
struct Slot {
    ptr: NonNull<u8>,
    size: usize,
    tag: u8,
}

fn fill(slot: &Slot) {
    unsafe { slot.ptr.as_ptr().write_bytes(slot.tag, slot.size) };
}

fn intact(slot: &Slot, len: usize) -> bool {
    let bytes = unsafe { std::slice::from_raw_parts(slot.ptr.as_ptr(), len) };
    bytes.iter().all(|&b| b == slot.tag)
}

/// Mostly pooled sizes with the odd large request.
fn pick_size(rng: &mut XorShift64) -> usize {
    if rng.gen_range_usize(0, 9) == 0 {
        rng.gen_range_usize(MAX_BYTES + 1, 4 * 1024)
    } else {
        rng.gen_range_usize(1, MAX_BYTES)
    }
}

#[test]
fn deterministic_pool_sequences_never_overlap_live_blocks() {
    const SEEDS: [u64; 4] = [1, 2, 3, 0xC0FF_EE00];
    const STEPS: usize = 4_000;
    const SLOTS: usize = 64;

    for seed in SEEDS {
        let mut pool = PoolAllocator::new();
        let mut rng = XorShift64::new(seed);
        let mut slots: [Option<Slot>; SLOTS] = [None; SLOTS];

        for step in 0..STEPS {
            let i = rng.gen_range_usize(0, SLOTS - 1);
            let tag = (step % 251) as u8 + 1;
            match slots[i] {
                None => {
                    let size = pick_size(&mut rng);
                    let ptr = pool.allocate(size).expect("allocate");
                    assert_eq!(
                        ptr.as_ptr() as usize % ALIGN,
                        0,
                        "seed={seed} step={step}: misaligned block for {size} bytes"
                    );
                    let slot = Slot { ptr, size, tag };
                    fill(&slot);
                    slots[i] = Some(slot);
                }
                Some(slot) => {
                    assert!(
                        intact(&slot, slot.size),
                        "seed={seed} step={step}: live block of {} bytes was overwritten",
                        slot.size
                    );
                    if rng.gen_range_usize(0, 2) == 0 {
                        let new_size = pick_size(&mut rng);
                        let moved = unsafe { pool.reallocate(slot.ptr, slot.size, new_size) }
                            .expect("reallocate");
                        let kept = slot.size.min(new_size);
                        let moved_slot = Slot {
                            ptr: moved,
                            size: new_size,
                            tag: slot.tag,
                        };
                        assert!(
                            intact(&moved_slot, kept),
                            "seed={seed} step={step}: reallocate lost contents"
                        );
                        let retagged = Slot { tag, ..moved_slot };
                        fill(&retagged);
                        slots[i] = Some(retagged);
                    } else {
                        unsafe { pool.deallocate(slot.ptr, slot.size) };
                        slots[i] = None;
                    }
                }
            }
        }

        for slot in slots.iter().flatten() {
            assert!(intact(slot, slot.size), "seed={seed}: final sweep found corruption");
            unsafe { pool.deallocate(slot.ptr, slot.size) };
        }

        let stats = pool.stats();
        assert!(stats.heap_size > 0, "seed={seed}: pool never grew");
        assert_eq!(stats.salvaged_blocks, 0, "seed={seed}: host heap never fails here");
        assert!(stats.refills >= stats.arena_growths);
    }
}

#[test]
fn freed_blocks_are_reused_before_arena_grows() {
    let mut pool = PoolAllocator::new();
    let mut rng = XorShift64::new(42);

    // Warm every class once so each has a batch on hand.
    for n in (ALIGN..=MAX_BYTES).step_by(ALIGN) {
        let p = pool.allocate(n).unwrap();
        unsafe { pool.deallocate(p, n) };
    }
    let warmed = pool.stats();
    assert!(warmed.free_blocks.iter().all(|&listed| listed > 0));

    for _ in 0..10_000 {
        let n = rng.gen_range_usize(1, MAX_BYTES);
        let p = pool.allocate(n).unwrap();
        unsafe { pool.deallocate(p, n) };
    }
    let after = pool.stats();
    assert_eq!(after.heap_size, warmed.heap_size);
    assert_eq!(after.refills, warmed.refills);
    assert_eq!(after.free_blocks, warmed.free_blocks);
}

#[test]
fn arena_state_follows_chunk_allocation() {
    let mut pool = PoolAllocator::new();
    assert_eq!(pool.arena_state(), ArenaState::Empty);
    pool.allocate(8).unwrap();
    assert_eq!(pool.arena_state(), ArenaState::Partial);
    for _ in 0..20 {
        pool.allocate(8).unwrap();
    }
    assert_eq!(pool.arena_state(), ArenaState::Exhausted);
    pool.allocate(16).unwrap();
    assert_eq!(pool.arena_state(), ArenaState::Partial);
}

#[test]
fn stats_serialize_with_stable_field_names() {
    let mut pool = PoolAllocator::new();
    pool.allocate(8).unwrap();
    let big = pool.allocate(1024).unwrap();

    let value = serde_json::to_value(pool.stats()).unwrap();
    assert_eq!(value["heap_size"], json!(320));
    assert_eq!(value["arena_remaining"], json!(160));
    assert_eq!(value["arena_state"], json!("partial"));
    assert_eq!(value["refills"], json!(1));
    assert_eq!(value["fallback_allocs"], json!(1));
    assert_eq!(value["last_growth_bytes"], json!(320));
    assert_eq!(value["free_blocks"].as_array().unwrap().len(), NUM_FREE_LISTS);

    let back: PoolStats = serde_json::from_value(value).unwrap();
    assert_eq!(back, pool.stats());
    unsafe { pool.deallocate(big, 1024) };
}

#[test]
fn lifecycle_logs_emit_as_jsonl() {
    let mut pool = PoolAllocator::with_config(PoolConfig::default());
    let p = pool.allocate(40).unwrap();
    let q = unsafe { pool.reallocate(p, 40, 80) }.unwrap();
    unsafe { pool.deallocate(q, 80) };

    let lines: Vec<String> = pool
        .drain_lifecycle_logs()
        .iter()
        .map(|record| serde_json::to_string(record).unwrap())
        .collect();
    assert!(!lines.is_empty());

    let mut previous_id = 0;
    for line in &lines {
        let value: Value = serde_json::from_str(line).unwrap();
        for key in [
            "decision_id",
            "trace_id",
            "level",
            "symbol",
            "event",
            "ptr",
            "size",
            "class",
            "outcome",
            "details",
            "heap_size",
            "arena_remaining",
        ] {
            assert!(value.get(key).is_some(), "missing {key} in {line}");
        }
        let id = value["decision_id"].as_u64().unwrap();
        assert!(id > previous_id);
        previous_id = id;
        let trace_id = value["trace_id"].as_str().unwrap();
        assert!(trace_id.starts_with("binalloc::pool::"), "{trace_id}");
        assert!(trace_id.ends_with(&format!("{id:016x}")), "{trace_id}");
    }

    let events: Vec<Value> = lines
        .iter()
        .map(|line| serde_json::from_str::<Value>(line).unwrap()["event"].clone())
        .collect();
    assert!(events.contains(&json!("arena_grow")));
    assert!(events.contains(&json!("realloc_move")));
    assert!(events.contains(&json!("free")));
    let grow = lines
        .iter()
        .map(|line| serde_json::from_str::<Value>(line).unwrap())
        .find(|value| value["event"] == json!("arena_grow"))
        .unwrap();
    assert_eq!(grow["level"], json!("info"));
}

#[test]
fn pools_are_independent() {
    let mut a = PoolAllocator::new();
    let mut b = PoolAllocator::new();
    let pa = a.allocate(32).unwrap();
    unsafe { a.deallocate(pa, 32) };
    assert_eq!(a.free_blocks(3), 20);
    assert_eq!(b.free_blocks(3), 0);
    let pb = b.allocate(32).unwrap();
    assert_ne!(pa, pb);
    assert_eq!(a.heap_size(), b.heap_size());
}

#[test]
fn pool_moves_to_another_thread() {
    let mut pool = PoolAllocator::new();
    let p = pool.allocate(56).unwrap();
    unsafe { pool.deallocate(p, 56) };
    let addr = p.as_ptr() as usize;
    let reused = std::thread::spawn(move || pool.allocate(56).unwrap().as_ptr() as usize == addr)
        .join()
        .unwrap();
    assert!(reused);
}
