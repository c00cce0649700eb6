//! End-to-end walk: author a container, serialize it, parse it back, build
//! a segmented memory image, and follow a far reference through the image's
//! symbol table.

use std::io::Cursor;

use anyhow::Result;
use ferry_kargs::{HostMemory, SegmentedMemory};
use ferry_mem::refs::{memory_at, MemoryRef, RefFormat, RefInt};
use ferry_mem::MemoryUnit;
use ferry_storage::{DataStorage, FormatFilter, Property, Section, Symbol};

const FORMAT_TAG: u32 = 0x46525901; // "FRY" + version

fn main() -> Result<()> {
    // a container with a code-like section, a data section, and a root
    // pointing into the second section
    let mut root = 1u32.to_ne_bytes().to_vec();
    root.extend_from_slice(&4u32.to_ne_bytes());

    let storage = DataStorage {
        strings: vec!["lut".into(), "state".into(), "root".into()],
        sections: vec![
            Section {
                name_idx: 0,
                contents: (0u8..64).collect(),
            },
            Section {
                name_idx: 1,
                contents: vec![0xAB; 32],
            },
        ],
        symbols: vec![
            Symbol { name_idx: 0, section_idx: 0, value: 0 },
            Symbol { name_idx: 1, section_idx: 1, value: 16 },
        ],
        properties: vec![Property { name_idx: 2, value: root }],
    };

    let mut image = Vec::new();
    let full_size = storage.write_to(FORMAT_TAG, &mut image)?;
    println!("container payload: {full_size} bytes");

    let mut cursor = Cursor::new(image);
    let (format, reparsed) = DataStorage::read_from(&mut cursor, FormatFilter::exact(FORMAT_TAG))?;
    assert_eq!(format, FORMAT_TAG);
    assert_eq!(reparsed, storage);

    // the host allocator stands in for a device backing here
    let device = HostMemory::new();
    let memory = SegmentedMemory::from_data_storage(&reparsed, &device)?;

    println!(
        "segmented image: {} segments, {} table symbols, root at {:?}",
        memory.sizes.num_segments(),
        memory.sizes.num_table_entries(),
        memory.ptrs.root(),
    );

    // read the device-resident symbol table back as a memory table and
    // follow a far reference to symbol 1, offset 2 units
    let table_ptr = memory.ptrs.table().expect("image has symbols");
    let num_symbols = memory.sizes.num_table_entries();
    let memory_table: Vec<*const MemoryUnit> = (0..num_symbols)
        .map(|i| unsafe {
            table_ptr
                .as_ptr()
                .cast::<*const MemoryUnit>()
                .add(i)
                .read()
        })
        .collect();

    let reference = MemoryRef::encode_far(MemoryRef::min_index_bits(), 1, 2);
    let address = memory_at(reference, RefFormat::new(MemoryRef::min_index_bits(), 0), None, &memory_table);
    println!("far reference {reference:#x} resolves to {address:?}");

    memory.destroy(&device);
    Ok(())
}
