//! Instrumented bump allocator standing in for a device backing.

// not every test binary uses every helper
#![allow(dead_code)]

use std::cell::RefCell;
use std::ptr::NonNull;

use ferry_kargs::MemoryOperations;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OpCounts {
    pub bytes_allocd: usize,
    pub bytes_mapped: usize,
    pub num_allocd: usize,
    pub num_freed: usize,
    pub num_mapped: usize,
    pub num_unmapped: usize,
}

struct ArenaState {
    backing: Vec<u64>,
    offset: usize,
    counts: OpCounts,
    alloc_budget: Option<usize>,
}

/// Bump allocator over a fixed backing that counts every operation.
///
/// `free` only counts; a bump arena reclaims nothing. An allocation budget
/// makes the Nth allocation fail, for exercising unwind paths.
pub struct CountingArena {
    state: RefCell<ArenaState>,
}

impl CountingArena {
    pub fn with_capacity(num_bytes: usize) -> Self {
        Self {
            state: RefCell::new(ArenaState {
                backing: vec![0u64; num_bytes.div_ceil(8)],
                offset: 0,
                counts: OpCounts::default(),
                alloc_budget: None,
            }),
        }
    }

    pub fn failing_after(num_bytes: usize, successful_allocs: usize) -> Self {
        let arena = Self::with_capacity(num_bytes);
        arena.state.borrow_mut().alloc_budget = Some(successful_allocs);
        arena
    }

    pub fn counts(&self) -> OpCounts {
        self.state.borrow().counts
    }

    pub fn reset_counts(&self) {
        self.state.borrow_mut().counts = OpCounts::default();
    }
}

impl MemoryOperations for CountingArena {
    fn alloc(&self, num_bytes: usize, alignment: usize) -> Option<NonNull<u8>> {
        if num_bytes == 0 {
            return None;
        }

        let mut state = self.state.borrow_mut();

        if let Some(budget) = state.alloc_budget.as_mut() {
            if *budget == 0 {
                return None;
            }
            *budget -= 1;
        }

        let alignment = if alignment == 0 { 16 } else { alignment };
        let base = state.backing.as_ptr() as usize;
        let aligned = (base + state.offset).next_multiple_of(alignment);
        let offset = aligned - base;

        if offset + num_bytes > state.backing.len() * 8 {
            return None;
        }

        state.offset = offset + num_bytes;
        state.counts.bytes_allocd += num_bytes;
        state.counts.num_allocd += 1;

        NonNull::new(aligned as *mut u8)
    }

    fn free(&self, _memory: NonNull<u8>) {
        self.state.borrow_mut().counts.num_freed += 1;
    }

    fn map(&self, _memory: NonNull<u8>, num_bytes: usize) -> bool {
        let mut state = self.state.borrow_mut();
        state.counts.bytes_mapped += num_bytes;
        state.counts.num_mapped += 1;
        true
    }

    fn unmap(&self, _memory: NonNull<u8>) -> bool {
        self.state.borrow_mut().counts.num_unmapped += 1;
        true
    }
}

/// Operations whose map/unmap always fail; allocation delegates to an arena.
pub struct UnmappableArena(pub CountingArena);

impl MemoryOperations for UnmappableArena {
    fn alloc(&self, num_bytes: usize, alignment: usize) -> Option<NonNull<u8>> {
        self.0.alloc(num_bytes, alignment)
    }

    fn free(&self, memory: NonNull<u8>) {
        self.0.free(memory);
    }

    fn map(&self, _memory: NonNull<u8>, _num_bytes: usize) -> bool {
        false
    }

    fn unmap(&self, _memory: NonNull<u8>) -> bool {
        false
    }
}
