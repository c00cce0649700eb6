//! Pluggable memory operations.
//!
//! Every buffer this crate manages is owned by some memory backing (the
//! process heap, a device's shared virtual memory, a mapped file), and all
//! backings are driven through the same four operations. An implementor
//! carries whatever properties its backing needs (a device context, mapping
//! flags); callers never see them.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use ahash::AHashMap;
use parking_lot::Mutex;

/// Default alignment when the caller passes zero: the strictest fundamental
/// alignment, like the process allocator's.
pub const DEFAULT_ALIGNMENT: usize = 16;

/// Allocation and mapping operations of one memory backing.
///
/// `map` is a blocking synchronization point: it returns once writes made on
/// the owning device are visible to the host. `unmap` flushes host writes
/// back. Host backings treat both as no-ops that always succeed.
pub trait MemoryOperations {
    /// Allocate `num_bytes` with the given alignment (0 means the backing's
    /// default). Returns `None` on exhaustion or a zero-byte request.
    fn alloc(&self, num_bytes: usize, alignment: usize) -> Option<NonNull<u8>>;

    /// Release memory previously returned by `alloc` of the same backing.
    fn free(&self, memory: NonNull<u8>);

    /// Make `num_bytes` at `memory` readable and writable by the host.
    fn map(&self, memory: NonNull<u8>, num_bytes: usize) -> bool;

    /// End host access started by `map`.
    fn unmap(&self, memory: NonNull<u8>) -> bool;
}

/// Process-heap memory operations.
///
/// The ledger keyed by pointer address remembers each allocation's layout,
/// which the global allocator requires at release time.
#[derive(Debug, Default)]
pub struct HostMemory {
    layouts: Mutex<AHashMap<usize, Layout>>,
}

impl HostMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live allocations.
    pub fn live(&self) -> usize {
        self.layouts.lock().len()
    }
}

impl MemoryOperations for HostMemory {
    #[allow(unsafe_code)]
    fn alloc(&self, num_bytes: usize, alignment: usize) -> Option<NonNull<u8>> {
        if num_bytes == 0 {
            return None;
        }

        let alignment = if alignment == 0 {
            DEFAULT_ALIGNMENT
        } else {
            alignment
        };
        let layout = Layout::from_size_align(num_bytes, alignment).ok()?;

        // SAFETY: the layout has a non-zero size.
        let memory = NonNull::new(unsafe { alloc::alloc(layout) })?;

        self.layouts.lock().insert(memory.as_ptr() as usize, layout);
        Some(memory)
    }

    #[allow(unsafe_code)]
    fn free(&self, memory: NonNull<u8>) {
        if let Some(layout) = self.layouts.lock().remove(&(memory.as_ptr() as usize)) {
            // SAFETY: the pointer came from `alloc` with this exact layout
            // and is removed from the ledger before deallocation.
            unsafe { alloc::dealloc(memory.as_ptr(), layout) };
        }
    }

    fn map(&self, _memory: NonNull<u8>, _num_bytes: usize) -> bool {
        true
    }

    fn unmap(&self, _memory: NonNull<u8>) -> bool {
        true
    }
}

/// Copy between two buffers through their backings' mapping protocols.
///
/// A zero-byte copy succeeds without touching either side. Otherwise each
/// side is mapped exactly once, the bytes are copied, and each side is
/// unmapped exactly once; a map failure unwinds the mapping already taken.
/// Source and destination may be the same buffer.
#[allow(unsafe_code)]
pub fn map_copy_unmap(
    dest: NonNull<u8>,
    src: NonNull<u8>,
    num_bytes: usize,
    dest_ops: &dyn MemoryOperations,
    src_ops: &dyn MemoryOperations,
) -> bool {
    if num_bytes == 0 {
        return true;
    }

    if !dest_ops.map(dest, num_bytes) {
        return false;
    }
    if !src_ops.map(src, num_bytes) {
        dest_ops.unmap(dest);
        return false;
    }

    // SAFETY: both regions are mapped and span at least num_bytes (caller
    // contract); ptr::copy permits the regions to overlap or coincide.
    unsafe { std::ptr::copy(src.as_ptr(), dest.as_ptr(), num_bytes) };

    let src_ok = src_ops.unmap(src);
    dest_ops.unmap(dest) && src_ok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_alloc_free_round_trip() {
        let host = HostMemory::new();

        let memory = host.alloc(128, 0).unwrap();
        assert_eq!(memory.as_ptr() as usize % DEFAULT_ALIGNMENT, 0);
        assert_eq!(host.live(), 1);

        host.free(memory);
        assert_eq!(host.live(), 0);
    }

    #[test]
    fn host_zero_byte_alloc_fails() {
        let host = HostMemory::new();
        assert!(host.alloc(0, 8).is_none());
    }

    #[test]
    fn host_alloc_respects_alignment() {
        let host = HostMemory::new();
        let memory = host.alloc(24, 64).unwrap();
        assert_eq!(memory.as_ptr() as usize % 64, 0);
        host.free(memory);
    }

    #[test]
    fn host_map_is_noop() {
        let host = HostMemory::new();
        let memory = host.alloc(16, 0).unwrap();
        assert!(host.map(memory, 16));
        assert!(host.unmap(memory));
        host.free(memory);
    }

    #[test]
    #[allow(unsafe_code)]
    fn copies_through_host_mappings() {
        let host = HostMemory::new();
        let dest = host.alloc(128, 0).unwrap();
        let src = host.alloc(128, 0).unwrap();

        for i in 0..128usize {
            // SAFETY: both buffers are live 128-byte host allocations.
            unsafe { src.as_ptr().add(i).write(((i * i + 1) % 256) as u8) };
        }

        assert!(map_copy_unmap(dest, src, 0, &host, &host));
        assert!(map_copy_unmap(dest, src, 128, &host, &host));

        for i in 0..128usize {
            // SAFETY: dest is a live 128-byte host allocation.
            let value = unsafe { dest.as_ptr().add(i).read() };
            assert_eq!(value as usize, (i * i + 1) % 256);
        }

        host.free(src);
        host.free(dest);
    }

    #[test]
    #[allow(unsafe_code)]
    fn self_copy_preserves_contents() {
        let host = HostMemory::new();
        let buffer = host.alloc(64, 0).unwrap();

        for i in 0..64usize {
            // SAFETY: buffer is a live 64-byte host allocation.
            unsafe { buffer.as_ptr().add(i).write(i as u8) };
        }

        assert!(map_copy_unmap(buffer, buffer, 64, &host, &host));

        for i in 0..64usize {
            // SAFETY: buffer is a live 64-byte host allocation.
            let value = unsafe { buffer.as_ptr().add(i).read() };
            assert_eq!(value as usize, i);
        }

        host.free(buffer);
    }
}
