mod common;

use common::{CountingArena, UnmappableArena};
use ferry_kargs::{KargsError, SegmentedMemory, SegmentedMemoryLayout, SymbolLocation};
use ferry_mem::MemoryUnit;
use ferry_storage::{DataStorage, Property, Section, Symbol};
use pretty_assertions::assert_eq;

fn root_property(segment_idx: u32, value: u32) -> Property {
    let mut bytes = segment_idx.to_ne_bytes().to_vec();
    bytes.extend_from_slice(&value.to_ne_bytes());
    Property {
        name_idx: 2,
        value: bytes,
    }
}

/// Two sections of 24 and 16 bytes, three symbols, a root in segment 1.
fn sample_storage() -> DataStorage {
    DataStorage {
        strings: vec!["code".into(), "data".into(), "root".into()],
        sections: vec![
            Section {
                name_idx: 0,
                contents: (0u8..24).collect(),
            },
            Section {
                name_idx: 1,
                contents: (100u8..116).collect(),
            },
        ],
        symbols: vec![
            Symbol { name_idx: 0, section_idx: 0, value: 4 },
            Symbol { name_idx: 1, section_idx: 0, value: 24 },
            Symbol { name_idx: 0, section_idx: 1, value: 0 },
        ],
        properties: vec![root_property(1, 8)],
    }
}

#[test]
fn layout_extraction_reads_root_property() {
    let layout = SegmentedMemoryLayout::from_data_storage(&sample_storage());

    assert_eq!(
        layout.root_symbol,
        SymbolLocation { segment_idx: 1, value: 8 }
    );
    assert_eq!(layout.table_symbols.len(), 3);
    assert_eq!(
        layout.table_symbols[1],
        SymbolLocation { segment_idx: 0, value: 24 }
    );
}

#[test]
fn layout_defaults_root_without_property() {
    let mut storage = sample_storage();
    storage.properties.clear();

    let layout = SegmentedMemoryLayout::from_data_storage(&storage);
    assert_eq!(layout.root_symbol, SymbolLocation::default());
}

#[test]
fn layout_ignores_malformed_root_property() {
    let mut storage = sample_storage();
    storage.properties = vec![Property {
        name_idx: 2,
        value: vec![1, 2, 3],
    }];

    let layout = SegmentedMemoryLayout::from_data_storage(&storage);
    assert_eq!(layout.root_symbol, SymbolLocation::default());
}

#[test]
fn construction_fills_segments_and_resolves_symbols() {
    let device = CountingArena::with_capacity(4096);
    let storage = sample_storage();

    let memory = SegmentedMemory::from_data_storage(&storage, &device).unwrap();

    assert_eq!(memory.sizes.segment_sizes(), &[24, 16]);
    assert_eq!(memory.sizes.num_table_entries(), 3);

    let segments = memory.ptrs.segments();
    let seg0 = segments[0].unwrap();
    let seg1 = segments[1].unwrap();

    // section contents were copied through map/unmap
    for (i, expected) in (0u8..24).enumerate() {
        let value = unsafe { seg0.as_ptr().add(i).read() };
        assert_eq!(value, expected);
    }
    for (i, expected) in (100u8..116).enumerate() {
        let value = unsafe { seg1.as_ptr().add(i).read() };
        assert_eq!(value, expected);
    }

    // root resolves to segment_base[1] + 8
    assert_eq!(
        memory.ptrs.root().unwrap().as_ptr() as usize,
        seg1.as_ptr() as usize + 8
    );

    // the device-resident table holds one resolved pointer per symbol
    let table = memory.ptrs.table().unwrap().as_ptr() as *const *const MemoryUnit;
    let resolved: Vec<usize> = (0..3).map(|i| unsafe { table.add(i).read() } as usize).collect();
    assert_eq!(
        resolved,
        vec![
            seg0.as_ptr() as usize + 4,
            seg0.as_ptr() as usize + 24,
            seg1.as_ptr() as usize,
        ]
    );

    memory.destroy(&device);
    let counts = device.counts();
    assert_eq!(counts.num_freed, counts.num_allocd);
}

#[test]
fn construction_defaults_root_to_first_segment() {
    let device = CountingArena::with_capacity(4096);
    let mut storage = sample_storage();
    storage.properties.clear();

    let memory = SegmentedMemory::from_data_storage(&storage, &device).unwrap();

    let seg0 = memory.ptrs.segments()[0].unwrap();
    assert_eq!(memory.ptrs.root(), Some(seg0));

    memory.destroy(&device);
}

#[test]
fn construction_failure_frees_completed_steps() {
    // segments allocate, the symbol table allocation fails
    let device = CountingArena::failing_after(4096, 2);
    let storage = sample_storage();

    let result = SegmentedMemory::from_data_storage(&storage, &device);
    assert!(matches!(
        result,
        Err(KargsError::AllocationFailed { what: "symbol table", .. })
    ));

    let counts = device.counts();
    assert_eq!(counts.num_allocd, 2);
    assert_eq!(counts.num_freed, 2);
}

#[test]
fn construction_failure_on_unmappable_device() {
    let device = UnmappableArena(CountingArena::with_capacity(4096));
    let storage = sample_storage();

    let result = SegmentedMemory::from_data_storage(&storage, &device);
    assert!(matches!(result, Err(KargsError::CopyFailed { what: "segment", .. })));

    let counts = device.0.counts();
    assert_eq!(counts.num_freed, counts.num_allocd);
}

#[test]
fn empty_storage_constructs_empty_image() {
    let device = CountingArena::with_capacity(256);
    let storage = DataStorage::default();

    let memory = SegmentedMemory::from_data_storage(&storage, &device).unwrap();

    assert_eq!(memory.sizes.num_segments(), 0);
    assert_eq!(memory.ptrs.root(), None);
    assert_eq!(memory.ptrs.table(), None);
    assert_eq!(device.counts().num_allocd, 0);

    memory.destroy(&device);
}
