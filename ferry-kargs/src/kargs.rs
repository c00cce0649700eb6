//! Computation-state and computation-parameter argument groups.
//!
//! Both families follow the same phase contract: deep-copy a sizes
//! descriptor, allocate a null-initialized handle array, allocate backing
//! memory per handle, copy pairwise through map/unmap, free in reverse.
//! Splitting the handle array from the backing memory fixes the *number* of
//! argument slots before individual sizes or backings are known, and lets
//! partial configurations leave slots unallocated without special cases.

use std::ptr::NonNull;

use crate::error::{KargsError, Result};
use crate::ops::{map_copy_unmap, MemoryOperations};

pub(crate) fn alloc_slots(
    slots: &mut [Option<NonNull<u8>>],
    sizes: &[usize],
    alignment: usize,
    what: &'static str,
    ops: &dyn MemoryOperations,
) -> Result<()> {
    debug_assert_eq!(slots.len(), sizes.len());

    for (index, (slot, &num_bytes)) in slots.iter_mut().zip(sizes).enumerate() {
        if num_bytes == 0 {
            continue;
        }
        match ops.alloc(num_bytes, alignment) {
            Some(memory) => *slot = Some(memory),
            None => {
                return Err(KargsError::AllocationFailed {
                    what,
                    index,
                    num_bytes,
                })
            }
        }
    }

    Ok(())
}

pub(crate) fn free_slots(slots: &mut [Option<NonNull<u8>>], ops: &dyn MemoryOperations) {
    for slot in slots {
        if let Some(memory) = slot.take() {
            ops.free(memory);
        }
    }
}

pub(crate) fn copy_slots(
    dest: &[Option<NonNull<u8>>],
    src: &[Option<NonNull<u8>>],
    sizes: &[usize],
    what: &'static str,
    dest_ops: &dyn MemoryOperations,
    src_ops: &dyn MemoryOperations,
) -> Result<()> {
    debug_assert_eq!(dest.len(), sizes.len());
    debug_assert_eq!(src.len(), sizes.len());

    for (index, &num_bytes) in sizes.iter().enumerate() {
        // an absent slot on either side means the argument is not part of
        // this configuration, not an error
        let (Some(dest), Some(src)) = (dest[index], src[index]) else {
            continue;
        };

        if num_bytes > 0 && !map_copy_unmap(dest, src, num_bytes, dest_ops, src_ops) {
            return Err(KargsError::CopyFailed { what, index });
        }
    }

    Ok(())
}

///////////////////////////////////////////////////////////////////////////////
// Computation state
///////////////////////////////////////////////////////////////////////////////

/// Byte sizes of the computation-state buffers; immutable once created.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CstateSizes {
    sizes: Box<[usize]>,
}

impl CstateSizes {
    /// Deep-copy a caller-supplied size array.
    pub fn copy_from(sizes: &[usize]) -> Self {
        Self { sizes: sizes.into() }
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }
}

/// Device buffer handles for computation state.
///
/// Entries are null until backing memory is allocated and become null again
/// when it is freed.
#[derive(Debug, Default)]
pub struct CstatePtrs {
    arrays: Box<[Option<NonNull<u8>>]>,
}

impl CstatePtrs {
    /// Allocate the handle array only; backing memory comes separately.
    pub fn with_arrays(sizes: &CstateSizes) -> Self {
        Self {
            arrays: vec![None; sizes.len()].into_boxed_slice(),
        }
    }

    pub fn arrays(&self) -> &[Option<NonNull<u8>>] {
        &self.arrays
    }

    /// Allocate backing memory for every slot with a non-zero size.
    ///
    /// On failure the slots already filled by this call are freed again
    /// before the error is reported.
    pub fn alloc_memory(
        &mut self,
        sizes: &CstateSizes,
        device: &dyn MemoryOperations,
    ) -> Result<()> {
        if let Err(error) = alloc_slots(&mut self.arrays, sizes.sizes(), 0, "cstate", device) {
            free_slots(&mut self.arrays, device);
            return Err(error);
        }
        Ok(())
    }

    pub fn free_memory(&mut self, sizes: &CstateSizes, device: &dyn MemoryOperations) {
        debug_assert_eq!(self.arrays.len(), sizes.len());
        free_slots(&mut self.arrays, device);
    }

    /// Copy every pair of present buffers through the mapping protocol.
    pub fn copy_memory(
        dest: &Self,
        src: &Self,
        sizes: &CstateSizes,
        dest_device: &dyn MemoryOperations,
        src_device: &dyn MemoryOperations,
    ) -> Result<()> {
        copy_slots(
            &dest.arrays,
            &src.arrays,
            sizes.sizes(),
            "cstate",
            dest_device,
            src_device,
        )
    }
}

///////////////////////////////////////////////////////////////////////////////
// Computation parameters
///////////////////////////////////////////////////////////////////////////////

/// Byte sizes of the computation-parameter buffers: host-resident fixed
/// structures and device-resident arrays. Immutable once created.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CparamSizes {
    structures: Box<[usize]>,
    arrays: Box<[usize]>,
}

impl CparamSizes {
    /// Deep-copy caller-supplied size arrays.
    pub fn copy_from(structures: &[usize], arrays: &[usize]) -> Self {
        Self {
            structures: structures.into(),
            arrays: arrays.into(),
        }
    }

    pub fn structures(&self) -> &[usize] {
        &self.structures
    }

    pub fn arrays(&self) -> &[usize] {
        &self.arrays
    }
}

/// Buffer handles for computation parameters; null until allocated.
#[derive(Debug, Default)]
pub struct CparamPtrs {
    structures: Box<[Option<NonNull<u8>>]>,
    arrays: Box<[Option<NonNull<u8>>]>,
}

impl CparamPtrs {
    /// Allocate the handle arrays only; backing memory comes separately.
    pub fn with_arrays(sizes: &CparamSizes) -> Self {
        Self {
            structures: vec![None; sizes.structures.len()].into_boxed_slice(),
            arrays: vec![None; sizes.arrays.len()].into_boxed_slice(),
        }
    }

    pub fn structures(&self) -> &[Option<NonNull<u8>>] {
        &self.structures
    }

    pub fn arrays(&self) -> &[Option<NonNull<u8>>] {
        &self.arrays
    }

    /// Allocate backing memory: structures on the host, arrays on the
    /// device. Partial failure frees what this call already allocated.
    pub fn alloc_memory(
        &mut self,
        sizes: &CparamSizes,
        host: &dyn MemoryOperations,
        device: &dyn MemoryOperations,
    ) -> Result<()> {
        let result =
            alloc_slots(&mut self.structures, &sizes.structures, 0, "cparam structure", host)
                .and_then(|()| {
                    alloc_slots(&mut self.arrays, &sizes.arrays, 0, "cparam array", device)
                });

        if let Err(error) = result {
            free_slots(&mut self.structures, host);
            free_slots(&mut self.arrays, device);
            return Err(error);
        }
        Ok(())
    }

    pub fn free_memory(
        &mut self,
        sizes: &CparamSizes,
        host: &dyn MemoryOperations,
        device: &dyn MemoryOperations,
    ) {
        debug_assert_eq!(self.structures.len(), sizes.structures.len());
        debug_assert_eq!(self.arrays.len(), sizes.arrays.len());
        free_slots(&mut self.structures, host);
        free_slots(&mut self.arrays, device);
    }

    /// Copy every pair of present buffers: structures host-to-host, arrays
    /// device-to-device.
    pub fn copy_memory(
        dest: &Self,
        src: &Self,
        sizes: &CparamSizes,
        host: &dyn MemoryOperations,
        dest_device: &dyn MemoryOperations,
        src_device: &dyn MemoryOperations,
    ) -> Result<()> {
        copy_slots(
            &dest.structures,
            &src.structures,
            &sizes.structures,
            "cparam structure",
            host,
            host,
        )?;
        copy_slots(
            &dest.arrays,
            &src.arrays,
            &sizes.arrays,
            "cparam array",
            dest_device,
            src_device,
        )
    }
}
