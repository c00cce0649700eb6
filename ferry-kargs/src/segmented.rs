//! Segmented relocatable memory images.
//!
//! A segmented image is the runtime form of a data-storage container: one
//! device allocation per section, a device-resident table of resolved
//! symbol pointers (the memory table that far references index), and a root
//! pointer naming the image's entry point. Segment sizes and the symbol
//! table are fixed at construction; only segment contents are mutable.

use std::ptr::NonNull;

use ferry_mem::MemoryUnit;
use ferry_storage::DataStorage;
use tracing::{debug, warn};

use crate::error::{KargsError, Result};
use crate::kargs::{alloc_slots, copy_slots, free_slots};
use crate::ops::{map_copy_unmap, HostMemory, MemoryOperations};

/// Name of the property that positions the root symbol.
const ROOT_PROPERTY: &str = "root";

/// Position of a symbol inside a segmented image: owning segment plus byte
/// offset within it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SymbolLocation {
    pub segment_idx: u32,
    pub value: u32,
}

/// Root and table symbol positions, extracted once from a container and
/// immutable afterwards.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SegmentedMemoryLayout {
    pub root_symbol: SymbolLocation,
    pub table_symbols: Box<[SymbolLocation]>,
}

impl SegmentedMemoryLayout {
    /// Extract the symbol layout from a parsed container.
    ///
    /// The root position comes from a property named `"root"` holding
    /// exactly two u32 values `(segment_idx, value)`; a missing or
    /// wrong-sized property leaves the root at segment 0, offset 0.
    pub fn from_data_storage(storage: &DataStorage) -> Self {
        let mut root_symbol = SymbolLocation::default();

        if let Some(property) = storage.find_property(ROOT_PROPERTY) {
            if let [a, b, c, d, e, f, g, h] = property.value[..] {
                root_symbol = SymbolLocation {
                    segment_idx: u32::from_ne_bytes([a, b, c, d]),
                    value: u32::from_ne_bytes([e, f, g, h]),
                };
            } else {
                warn!(
                    size = property.value.len(),
                    "root property is not two single-size values, using segment 0 offset 0"
                );
            }
        }

        let table_symbols = storage
            .symbols
            .iter()
            .map(|symbol| SymbolLocation {
                segment_idx: symbol.section_idx,
                value: symbol.value,
            })
            .collect();

        Self {
            root_symbol,
            table_symbols,
        }
    }
}

/// Segment byte sizes and the symbol-table entry count; immutable once
/// created.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SegmentedMemorySizes {
    segment_sizes: Box<[usize]>,
    num_table_entries: usize,
}

impl SegmentedMemorySizes {
    /// Deep-copy caller-supplied sizes.
    pub fn copy_from(segment_sizes: &[usize], num_table_entries: usize) -> Self {
        Self {
            segment_sizes: segment_sizes.into(),
            num_table_entries,
        }
    }

    /// One segment per container section, sized in bytes; one table entry
    /// per container symbol.
    pub fn from_data_storage(storage: &DataStorage) -> Self {
        Self {
            segment_sizes: storage
                .sections
                .iter()
                .map(|section| section.contents.len())
                .collect(),
            num_table_entries: storage.symbols.len(),
        }
    }

    pub fn num_segments(&self) -> usize {
        self.segment_sizes.len()
    }

    pub fn segment_sizes(&self) -> &[usize] {
        &self.segment_sizes
    }

    pub fn num_table_entries(&self) -> usize {
        self.num_table_entries
    }

    fn table_bytes(&self) -> usize {
        self.num_table_entries * core::mem::size_of::<*const MemoryUnit>()
    }
}

/// Live pointers of a segmented image.
///
/// `table` is a device-resident array of `*const MemoryUnit`, one per table
/// symbol: the memory table handed to kernels for far-reference
/// resolution. Handles are null until allocated and null again after being
/// freed.
#[derive(Debug, Default)]
pub struct SegmentedMemoryPtrs {
    root: Option<NonNull<u8>>,
    table: Option<NonNull<u8>>,
    segments: Box<[Option<NonNull<u8>>]>,
}

impl SegmentedMemoryPtrs {
    /// Allocate the host-side handle array only.
    pub fn with_arrays(sizes: &SegmentedMemorySizes) -> Self {
        Self {
            root: None,
            table: None,
            segments: vec![None; sizes.num_segments()].into_boxed_slice(),
        }
    }

    pub fn root(&self) -> Option<NonNull<u8>> {
        self.root
    }

    pub fn table(&self) -> Option<NonNull<u8>> {
        self.table
    }

    pub fn segments(&self) -> &[Option<NonNull<u8>>] {
        &self.segments
    }

    /// Allocate device memory for every non-empty segment and for the
    /// symbol-pointer table. Partial failure frees what this call already
    /// allocated.
    pub fn alloc_memory(
        &mut self,
        sizes: &SegmentedMemorySizes,
        device: &dyn MemoryOperations,
    ) -> Result<()> {
        if let Err(error) = self.try_alloc_memory(sizes, device) {
            self.free_memory(sizes, device);
            return Err(error);
        }
        Ok(())
    }

    fn try_alloc_memory(
        &mut self,
        sizes: &SegmentedMemorySizes,
        device: &dyn MemoryOperations,
    ) -> Result<()> {
        alloc_slots(
            &mut self.segments,
            sizes.segment_sizes(),
            core::mem::align_of::<MemoryUnit>(),
            "segment",
            device,
        )?;

        let table_bytes = sizes.table_bytes();
        if table_bytes > 0 {
            self.table = Some(
                device
                    .alloc(table_bytes, core::mem::align_of::<*const MemoryUnit>())
                    .ok_or(KargsError::AllocationFailed {
                        what: "symbol table",
                        index: 0,
                        num_bytes: table_bytes,
                    })?,
            );
        }

        Ok(())
    }

    /// Free device memory in reverse of allocation order and null every
    /// handle, the root included.
    pub fn free_memory(&mut self, sizes: &SegmentedMemorySizes, device: &dyn MemoryOperations) {
        debug_assert_eq!(self.segments.len(), sizes.num_segments());

        if let Some(table) = self.table.take() {
            device.free(table);
        }
        free_slots(&mut self.segments, device);
        self.root = None;
    }

    /// Copy every pair of present segments through the mapping protocol.
    pub fn copy_memory(
        dest: &Self,
        src: &Self,
        sizes: &SegmentedMemorySizes,
        dest_device: &dyn MemoryOperations,
        src_device: &dyn MemoryOperations,
    ) -> Result<()> {
        copy_slots(
            &dest.segments,
            &src.segments,
            sizes.segment_sizes(),
            "segment",
            dest_device,
            src_device,
        )
    }

    /// Resolve the root and every table symbol into absolute pointers,
    /// writing the table through the device mapping protocol.
    #[allow(unsafe_code)]
    pub fn write_table(
        &mut self,
        sizes: &SegmentedMemorySizes,
        layout: &SegmentedMemoryLayout,
        device: &dyn MemoryOperations,
    ) -> Result<()> {
        // an image with no segments has nothing for the root to point at
        self.root = if self.segments.is_empty() {
            None
        } else {
            self.resolve(sizes, layout.root_symbol)
        };

        let num_symbols = layout.table_symbols.len();
        debug_assert_eq!(num_symbols, sizes.num_table_entries());

        if num_symbols == 0 {
            return Ok(());
        }
        let Some(table) = self.table else {
            return Ok(());
        };

        if !device.map(table, sizes.table_bytes()) {
            return Err(KargsError::TableWriteFailed);
        }

        let entries = table.as_ptr().cast::<*const MemoryUnit>();
        for (index, &symbol) in layout.table_symbols.iter().enumerate() {
            let resolved = self
                .resolve(sizes, symbol)
                .map_or(core::ptr::null(), |p| p.as_ptr().cast_const().cast());
            // SAFETY: the table is mapped and was allocated with room and
            // alignment for num_symbols pointer entries.
            unsafe { entries.add(index).write(resolved) };
        }

        if !device.unmap(table) {
            return Err(KargsError::TableWriteFailed);
        }

        Ok(())
    }

    fn resolve(
        &self,
        sizes: &SegmentedMemorySizes,
        symbol: SymbolLocation,
    ) -> Option<NonNull<u8>> {
        let segment_idx = symbol.segment_idx as usize;
        debug_assert!(segment_idx < self.segments.len(), "symbol segment out of range");
        debug_assert!(
            sizes
                .segment_sizes()
                .get(segment_idx)
                .is_some_and(|&size| symbol.value as usize <= size),
            "symbol value outside its segment"
        );

        let base = (*self.segments.get(segment_idx)?)?;
        NonNull::new(base.as_ptr().wrapping_add(symbol.value as usize))
    }
}

/// A fully constructed segmented image.
pub struct SegmentedMemory {
    pub sizes: SegmentedMemorySizes,
    pub layout: SegmentedMemoryLayout,
    pub ptrs: SegmentedMemoryPtrs,
}

impl SegmentedMemory {
    /// Build a complete image from a parsed container on the given device.
    ///
    /// The steps run in strict order: extract descriptors, allocate handle
    /// arrays, allocate device memory, copy section contents through
    /// map/unmap, resolve and write the symbol table. A failure at any
    /// step unwinds exactly the steps already completed. No partial image is
    /// ever returned.
    pub fn from_data_storage(
        storage: &DataStorage,
        device: &dyn MemoryOperations,
    ) -> Result<Self> {
        let layout = SegmentedMemoryLayout::from_data_storage(storage);
        let sizes = SegmentedMemorySizes::from_data_storage(storage);
        let mut ptrs = SegmentedMemoryPtrs::with_arrays(&sizes);

        ptrs.alloc_memory(&sizes, device)?;

        if let Err(error) = Self::fill(&mut ptrs, storage, &sizes, &layout, device) {
            ptrs.free_memory(&sizes, device);
            return Err(error);
        }

        debug!(
            num_segments = sizes.num_segments(),
            num_table_entries = sizes.num_table_entries(),
            "constructed segmented memory image"
        );

        Ok(Self {
            sizes,
            layout,
            ptrs,
        })
    }

    fn fill(
        ptrs: &mut SegmentedMemoryPtrs,
        storage: &DataStorage,
        sizes: &SegmentedMemorySizes,
        layout: &SegmentedMemoryLayout,
        device: &dyn MemoryOperations,
    ) -> Result<()> {
        // the container side of the copy is plain host memory with no
        // mapping requirements
        let host = HostMemory::new();

        for (index, section) in storage.sections.iter().enumerate() {
            let num_bytes = section.contents.len();
            if num_bytes == 0 {
                continue;
            }
            let Some(segment) = ptrs.segments[index] else {
                continue;
            };

            let contents = NonNull::from(&section.contents[0]);
            if !map_copy_unmap(segment, contents, num_bytes, device, &host) {
                return Err(KargsError::CopyFailed {
                    what: "segment",
                    index,
                });
            }
        }

        ptrs.write_table(sizes, layout, device)
    }

    /// Release the whole image. Device memory cannot free itself on drop;
    /// the allocator that produced it has to take it back.
    pub fn destroy(mut self, device: &dyn MemoryOperations) {
        self.ptrs.free_memory(&self.sizes, device);
    }
}
